//! Integration tests for the schema model mutation API and DDL round-trip.

use rand::Rng;
use rand::distributions::Alphanumeric;
use schemasense_core::error::SchemaError;
use schemasense_core::models::{
    Column, ColumnFact, ForeignKeyFact, IntrospectionFacts, PrimaryKeyFact, TableRef,
};
use schemasense_core::schema::CanonicalSchemaModel;

fn random_name(len: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    format!("t_{}", suffix.to_lowercase())
}

/// `public.customers(id PK, name)` and `public.orders(id PK, customer_id FK)`.
fn customers_orders() -> CanonicalSchemaModel {
    let mut model = CanonicalSchemaModel::new();
    model
        .add_table(
            TableRef::public("customers"),
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("name", "text"),
            ],
        )
        .unwrap();
    model
        .add_table(
            TableRef::public("orders"),
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("customer_id", "integer"),
            ],
        )
        .unwrap();
    model
        .add_relationship(
            &TableRef::public("orders"),
            "customer_id",
            &TableRef::public("customers"),
            "id",
        )
        .unwrap();
    model
}

const SHOP_DDL: &str = r#"
CREATE SCHEMA sales;

CREATE TABLE sales.customers (
    id integer NOT NULL,
    name varchar(120) NOT NULL,
    email text,
    CONSTRAINT customers_pkey PRIMARY KEY (id)
);

CREATE TABLE sales.orders (
    id bigint NOT NULL,
    customer_id integer NOT NULL,
    total numeric(10, 2),
    placed_at timestamp with time zone DEFAULT now(),
    CONSTRAINT orders_pkey PRIMARY KEY (id)
);

CREATE TABLE public.audit (
    id serial PRIMARY KEY,
    order_id bigint REFERENCES sales.orders (id),
    note text
);

ALTER TABLE sales.orders
    ADD CONSTRAINT orders_customer_id_fkey
    FOREIGN KEY (customer_id)
    REFERENCES sales.customers (id);
"#;

#[test]
fn test_drop_pk_column_referenced_by_relationship() {
    let mut model = customers_orders();
    let customers = TableRef::public("customers");

    let err = model.drop_column(&customers, "id", false).unwrap_err();
    assert!(matches!(err, SchemaError::SchemaValidation { .. }));
    assert!(
        err.to_string().contains("public.orders.customer_id"),
        "error should name the referencing column: {}",
        err
    );
    assert_eq!(model, customers_orders());

    model.drop_column(&customers, "id", true).unwrap();
    assert!(!model.table(&customers).unwrap().has_column("id"));
    assert_eq!(model.relationship_count(), 0);
    let orders = model.table(&TableRef::public("orders")).unwrap();
    assert!(!orders.column("customer_id").unwrap().is_fk);
}

#[test]
fn test_rename_table_and_back_is_identity() {
    for _ in 0..20 {
        let original = customers_orders();
        let mut model = original.clone();
        let temp = random_name(8);

        model.rename_table(&TableRef::public("customers"), &temp).unwrap();
        assert!(
            model
                .relationships()
                .iter()
                .all(|r| r.to == TableRef::public(&temp))
        );
        model.rename_table(&TableRef::public(&temp), "customers").unwrap();
        assert_eq!(model, original);
    }
}

#[test]
fn test_relationship_target_must_be_primary_key() {
    let mut model = customers_orders();
    let err = model
        .add_relationship(
            &TableRef::public("orders"),
            "id",
            &TableRef::public("customers"),
            "name",
        )
        .unwrap_err();
    assert!(matches!(err, SchemaError::SchemaValidation { .. }));
    assert_eq!(model.relationship_count(), 1);

    model
        .add_table(
            TableRef::public("refunds"),
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("order_id", "integer"),
            ],
        )
        .unwrap();
    model
        .add_relationship(
            &TableRef::public("refunds"),
            "order_id",
            &TableRef::public("orders"),
            "id",
        )
        .unwrap();
    let refunds = model.table(&TableRef::public("refunds")).unwrap();
    assert!(refunds.column("order_id").unwrap().is_fk);
}

#[test]
fn test_drop_referenced_table_force() {
    let mut model = customers_orders();
    let customers = TableRef::public("customers");

    assert!(model.drop_table(&customers, false).is_err());
    assert!(model.has_table(&customers));

    model.drop_table(&customers, true).unwrap();
    assert!(!model.has_table(&customers));
    assert!(model.relationships().iter().all(|r| !r.touches_table(&customers)));
}

#[test]
fn test_from_ddl_reads_schemas_keys_and_relationships() {
    let model = CanonicalSchemaModel::from_ddl(SHOP_DDL).unwrap();
    assert_eq!(model.table_count(), 3);
    assert_eq!(model.relationship_count(), 2);

    let orders = model.table(&TableRef::new("sales", "orders")).unwrap();
    assert!(orders.column("id").unwrap().is_pk);
    assert!(orders.column("customer_id").unwrap().is_fk);
    assert_eq!(orders.column("total").unwrap().data_type, "numeric(10,2)");

    let audit = model.table(&TableRef::public("audit")).unwrap();
    assert!(audit.column("id").unwrap().is_pk);
    assert!(audit.column("order_id").unwrap().is_fk);
}

#[test]
fn test_ddl_round_trip_is_stable() {
    let first = CanonicalSchemaModel::from_ddl(SHOP_DDL).unwrap();
    let emitted = first.to_ddl();
    let second = CanonicalSchemaModel::from_ddl(&emitted).unwrap();

    assert_eq!(second.table_count(), first.table_count());
    assert_eq!(second.relationship_count(), first.relationship_count());
    assert_eq!(second.to_ddl(), emitted);
}

#[test]
fn test_model_built_through_api_round_trips() {
    let model = customers_orders();
    let reparsed = CanonicalSchemaModel::from_ddl(&model.to_ddl()).unwrap();
    assert_eq!(reparsed, model);
}

fn column_fact(table: &str, column: &str, data_type: &str, nullable: bool) -> ColumnFact {
    ColumnFact {
        schema: "public".into(),
        table: table.into(),
        column: column.into(),
        data_type: data_type.into(),
        is_nullable: if nullable { "YES" } else { "NO" }.into(),
    }
}

#[test]
fn test_introspected_user_types_round_trip() {
    let facts = IntrospectionFacts {
        columns: vec![
            column_fact("moods", "id", "integer", false),
            column_fact("moods", "feeling", "public.mood", true),
            column_fact("moods", "flag", "\"char\"", true),
            column_fact("moods", "tags", "sales.\"Priority\"[]", true),
            column_fact("entries", "id", "bigint", false),
            column_fact("entries", "mood_id", "integer", true),
            column_fact("entries", "note", "character varying(40)", true),
        ],
        primary_keys: vec![
            PrimaryKeyFact {
                schema: "public".into(),
                table: "moods".into(),
                column: "id".into(),
            },
            PrimaryKeyFact {
                schema: "public".into(),
                table: "entries".into(),
                column: "id".into(),
            },
        ],
        foreign_keys: vec![ForeignKeyFact {
            from_schema: "public".into(),
            from_table: "entries".into(),
            from_column: "mood_id".into(),
            to_schema: "public".into(),
            to_table: "moods".into(),
            to_column: "id".into(),
        }],
        row_counts: None,
    };

    let model = CanonicalSchemaModel::from_introspection(&facts);
    let reparsed = CanonicalSchemaModel::from_ddl(&model.to_ddl()).unwrap();
    assert_eq!(reparsed, model);

    let moods = reparsed.table(&TableRef::public("moods")).unwrap();
    assert_eq!(moods.column("flag").unwrap().data_type, "\"char\"");
    assert_eq!(moods.column("tags").unwrap().data_type, "sales.\"Priority\"[]");
}

#[test]
fn test_unqualified_unknown_type_is_rejected() {
    let mut model = CanonicalSchemaModel::new();
    let err = model
        .add_table(TableRef::public("t"), vec![Column::new("feeling", "mood")])
        .unwrap_err();
    assert!(matches!(err, SchemaError::SchemaValidation { .. }));
    assert!(
        model
            .add_table(TableRef::public("t"), vec![Column::new("feeling", "public.mood")])
            .is_ok()
    );
}

#[test]
fn test_api_document_json_shape() {
    let doc = serde_json::to_value(customers_orders().to_dict_for_api()).unwrap();
    let tables = doc["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0]["schema"], "public");
    assert_eq!(tables[0]["columns"][0]["type"], "integer");
    assert_eq!(doc["relationships"][0]["from_column"], "customer_id");
    assert_eq!(doc["relationships"][0]["to_column"], "id");
}
