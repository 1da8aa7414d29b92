//! Unit tests for MaterialRequirementsService
//!
//! Tests cover:
//! - Single-level shortage arithmetic against stock snapshots
//! - Multi-level BOM explosion with scrap factors and shared leaves
//! - Cycle detection
//! - Missing active BOM handling

use async_trait::async_trait;
use chrono::Utc;
use mes_core::{
    config::{AppConfig, BomConfig, DatabaseConfig, InspectionConfig, RequirementsConfig},
    entities::{bom, bom_line, production_order},
    errors::ServiceError,
    events::{event_channel, EventSender},
    services::{
        material_requirements::{CalculationOptions, MaterialRequirementsService},
        stock_ledger::StockLedger,
    },
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Stock ledger stub returning fixed on-hand quantities
struct FixedStockLedger(HashMap<Uuid, Decimal>);

#[async_trait]
impl StockLedger for FixedStockLedger {
    async fn get_on_hand(
        &self,
        material_id: Uuid,
        _location_id: Option<Uuid>,
    ) -> Result<Decimal, ServiceError> {
        Ok(self.0.get(&material_id).copied().unwrap_or(Decimal::ZERO))
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        environment: "test".to_string(),
        log_level: "debug".to_string(),
        log_json: false,
        db: DatabaseConfig::default(),
        bom: BomConfig::default(),
        inspection: InspectionConfig::default(),
        requirements: RequirementsConfig::default(),
    }
}

fn make_service(
    db: DatabaseConnection,
    stock: HashMap<Uuid, Decimal>,
) -> (MaterialRequirementsService, EventSender) {
    let (event_sender, _processor) = event_channel(64);
    let service = MaterialRequirementsService::new(
        Arc::new(db),
        Arc::new(FixedStockLedger(stock)),
        Arc::new(event_sender.clone()),
        &test_config(),
    );
    (service, event_sender)
}

fn make_bom(product_id: Uuid) -> bom::Model {
    bom::Model {
        id: Uuid::new_v4(),
        product_id,
        bom_number: format!("BOM-{}", product_id.simple()),
        revision: "A".to_string(),
        status: bom::BomStatus::Active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn make_line(
    bom_id: Uuid,
    material_id: Uuid,
    quantity_per: Decimal,
    scrap_factor: Option<Decimal>,
    position: i32,
) -> bom_line::Model {
    bom_line::Model {
        id: Uuid::new_v4(),
        bom_id,
        material_id,
        quantity_per,
        scrap_factor,
        position,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn shortage_reported_when_on_hand_below_requirement() {
    let product = Uuid::new_v4();
    let material = Uuid::new_v4();
    let bom_model = make_bom(product);
    let line = make_line(bom_model.id, material, dec!(1), None, 1);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![bom_model]])
        .append_query_results(vec![vec![line]])
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .into_connection();

    let (service, _events) = make_service(db, HashMap::from([(material, dec!(60))]));

    let report = service
        .calculate(product, dec!(100), &CalculationOptions::default())
        .await
        .expect("calculation succeeds");

    assert_eq!(report.lines.len(), 1);
    let line = &report.lines[0];
    assert_eq!(line.material_id, material);
    assert_eq!(line.required, dec!(100));
    assert_eq!(line.on_hand, dec!(60));
    assert_eq!(line.shortage, dec!(40));
    assert!(line.insufficient);
    assert!(!report.can_proceed);
}

#[tokio::test]
async fn ample_stock_clears_the_report() {
    let product = Uuid::new_v4();
    let material = Uuid::new_v4();
    let bom_model = make_bom(product);
    let line = make_line(bom_model.id, material, dec!(1), None, 1);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![bom_model]])
        .append_query_results(vec![vec![line]])
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .into_connection();

    let (service, _events) = make_service(db, HashMap::from([(material, dec!(150))]));

    let report = service
        .calculate(product, dec!(100), &CalculationOptions::default())
        .await
        .expect("calculation succeeds");

    assert_eq!(report.lines[0].shortage, dec!(0));
    assert!(!report.lines[0].insufficient);
    assert!(report.can_proceed);
}

#[tokio::test]
async fn multi_level_explosion_sums_shared_leaves() {
    let product = Uuid::new_v4();
    let material_a = Uuid::new_v4();
    let subassembly = Uuid::new_v4();
    let material_b = Uuid::new_v4();

    let bom_top = make_bom(product);
    let line_a = make_line(bom_top.id, material_a, dec!(2), None, 1);
    let line_sub = make_line(bom_top.id, subassembly, dec!(1), None, 2);

    let bom_sub = make_bom(subassembly);
    let sub_line_a = make_line(bom_sub.id, material_a, dec!(3), None, 1);
    let sub_line_b = make_line(bom_sub.id, material_b, dec!(1), Some(dec!(0.5)), 2);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        // top-level BOM and its lines
        .append_query_results(vec![vec![bom_top]])
        .append_query_results(vec![vec![line_a, line_sub]])
        // material A is a leaf
        .append_query_results(vec![Vec::<bom::Model>::new()])
        // the subassembly recurses
        .append_query_results(vec![vec![bom_sub]])
        .append_query_results(vec![vec![sub_line_a, sub_line_b]])
        // both children of the subassembly are leaves
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .into_connection();

    let (service, _events) = make_service(
        db,
        HashMap::from([(material_a, dec!(100)), (material_b, dec!(0))]),
    );

    let report = service
        .calculate(product, dec!(10), &CalculationOptions::default())
        .await
        .expect("calculation succeeds");

    // A: 10 x 2 direct + 10 x 1 x 3 through the subassembly = 50
    let a = report
        .lines
        .iter()
        .find(|line| line.material_id == material_a)
        .expect("line for A");
    assert_eq!(a.required, dec!(50));
    assert_eq!(a.on_hand, dec!(100));
    assert!(!a.insufficient);

    // B: 10 x 1 x 1 x (1 + 0.5) = 15, nothing on hand
    let b = report
        .lines
        .iter()
        .find(|line| line.material_id == material_b)
        .expect("line for B");
    assert_eq!(b.required, dec!(15));
    assert_eq!(b.shortage, dec!(15));
    assert!(b.insufficient);

    assert!(!report.can_proceed);
}

#[tokio::test]
async fn allow_partial_overrides_the_proceed_flag() {
    let product = Uuid::new_v4();
    let material = Uuid::new_v4();
    let bom_model = make_bom(product);
    let line = make_line(bom_model.id, material, dec!(1), None, 1);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![bom_model]])
        .append_query_results(vec![vec![line]])
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .into_connection();

    let (service, _events) = make_service(db, HashMap::new());

    let options = CalculationOptions {
        location_id: None,
        allow_partial: true,
    };
    let report = service
        .calculate(product, dec!(5), &options)
        .await
        .expect("calculation succeeds");

    assert!(report.lines[0].insufficient);
    assert!(report.can_proceed);
}

#[tokio::test]
async fn two_node_cycle_is_reported_not_looped() {
    let product_a = Uuid::new_v4();
    let product_b = Uuid::new_v4();

    let bom_a = make_bom(product_a);
    let line_to_b = make_line(bom_a.id, product_b, dec!(1), None, 1);
    let bom_b = make_bom(product_b);
    let line_to_a = make_line(bom_b.id, product_a, dec!(1), None, 1);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![bom_a.clone()]])
        .append_query_results(vec![vec![line_to_b]])
        .append_query_results(vec![vec![bom_b]])
        .append_query_results(vec![vec![line_to_a]])
        .append_query_results(vec![vec![bom_a]])
        .into_connection();

    let (service, _events) = make_service(db, HashMap::new());

    let err = service
        .calculate(product_a, dec!(1), &CalculationOptions::default())
        .await
        .expect_err("cycle must be rejected");

    assert!(matches!(err, ServiceError::BomCycleSuspected { .. }));
}

#[tokio::test]
async fn missing_active_bom_is_rejected() {
    let product = Uuid::new_v4();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![Vec::<bom::Model>::new()])
        .into_connection();

    let (service, _events) = make_service(db, HashMap::new());

    let err = service
        .calculate(product, dec!(1), &CalculationOptions::default())
        .await
        .expect_err("no active BOM");

    assert!(matches!(err, ServiceError::NoActiveBom(id) if id == product));
}

#[tokio::test]
async fn non_positive_quantity_is_rejected() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let (service, _events) = make_service(db, HashMap::new());

    let err = service
        .calculate(Uuid::new_v4(), dec!(0), &CalculationOptions::default())
        .await
        .expect_err("zero quantity");

    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn calculate_for_order_stamps_the_requirement_check() {
    let product = Uuid::new_v4();
    let material = Uuid::new_v4();
    let order_id = Uuid::new_v4();

    let order = production_order::Model {
        id: order_id,
        order_number: "PO-1001".to_string(),
        product_id: product,
        planned_quantity: dec!(20),
        actual_quantity: dec!(0),
        planned_start_date: None,
        planned_end_date: None,
        actual_start_date: None,
        actual_end_date: None,
        status: production_order::ProductionOrderStatus::Draft,
        priority: production_order::OrderPriority::Normal,
        remarks: None,
        requirements_checked_at: None,
        quality_inspection_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let mut stamped = order.clone();
    stamped.requirements_checked_at = Some(Utc::now());

    let bom_model = make_bom(product);
    let line = make_line(bom_model.id, material, dec!(1), None, 1);

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![order]])
        .append_query_results(vec![vec![bom_model]])
        .append_query_results(vec![vec![line]])
        .append_query_results(vec![Vec::<bom::Model>::new()])
        // stamped order returned from the update
        .append_query_results(vec![vec![stamped]])
        .into_connection();

    let (service, _events) = make_service(db, HashMap::from([(material, dec!(100))]));

    let report = service
        .calculate_for_order(order_id, &CalculationOptions::default())
        .await
        .expect("calculation succeeds");

    assert_eq!(report.product_id, product);
    assert_eq!(report.quantity, dec!(20));
    assert!(report.can_proceed);
}
