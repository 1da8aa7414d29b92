use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        material_requirements::MaterialRequirementsService,
        production_orders::ProductionOrderService,
        quality_inspections::QualityInspectionService,
        stock_ledger::{DbStockLedger, StockLedger},
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: AppConfig,
    stock_ledger: Arc<dyn StockLedger>,
}

impl ServiceFactory {
    /// Creates a new service factory backed by the database stock ledger.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: AppConfig) -> Self {
        let stock_ledger = Arc::new(DbStockLedger::new(db_pool.clone()));
        Self::with_stock_ledger(db_pool, event_sender, config, stock_ledger)
    }

    /// Creates a factory with a caller-supplied stock ledger, e.g. an
    /// in-memory one for tests.
    pub fn with_stock_ledger(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: AppConfig,
        stock_ledger: Arc<dyn StockLedger>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
            stock_ledger,
        }
    }

    /// Creates a material requirements service instance
    pub fn material_requirements_service(&self) -> MaterialRequirementsService {
        MaterialRequirementsService::new(
            self.db_pool.clone(),
            self.stock_ledger.clone(),
            self.event_sender.clone(),
            &self.config,
        )
    }

    /// Creates a quality inspection service instance
    pub fn quality_inspection_service(&self) -> QualityInspectionService {
        QualityInspectionService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.config.inspection.clone(),
        )
    }

    /// Creates a production order service instance
    pub fn production_order_service(&self) -> ProductionOrderService {
        ProductionOrderService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            Arc::new(self.material_requirements_service()),
            Arc::new(self.quality_inspection_service()),
        )
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    /// Gets a reference to the event sender
    pub fn event_sender(&self) -> &Arc<EventSender> {
        &self.event_sender
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub material_requirements: Arc<MaterialRequirementsService>,
    pub quality_inspections: Arc<QualityInspectionService>,
    pub production_orders: Arc<ProductionOrderService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        let material_requirements = Arc::new(factory.material_requirements_service());
        let quality_inspections = Arc::new(factory.quality_inspection_service());
        let production_orders = Arc::new(ProductionOrderService::new(
            factory.db_pool().clone(),
            factory.event_sender().clone(),
            material_requirements.clone(),
            quality_inspections.clone(),
        ));

        Self {
            material_requirements,
            quality_inspections,
            production_orders,
        }
    }
}
