//! Manufacturing execution core
//!
//! This crate implements the stateful heart of a manufacturing execution
//! backend: the production order lifecycle, quality inspection outcomes, and
//! BOM-driven material requirement computation. It is a service-layer
//! library; the surrounding orchestration layer owns serialization,
//! authentication, and the HTTP/gRPC surface.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::services::factory::{ServiceContainer, ServiceFactory};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: ServiceContainer,
}

impl AppState {
    /// Wires the full service graph over an established connection pool.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
    ) -> Self {
        let factory = ServiceFactory::new(db.clone(), event_sender.clone(), config.clone());
        let services = ServiceContainer::new(&factory);

        Self {
            db,
            config,
            event_sender,
            services,
        }
    }

    pub fn production_order_service(
        &self,
    ) -> Arc<services::production_orders::ProductionOrderService> {
        self.services.production_orders.clone()
    }

    pub fn quality_inspection_service(
        &self,
    ) -> Arc<services::quality_inspections::QualityInspectionService> {
        self.services.quality_inspections.clone()
    }

    pub fn material_requirements_service(
        &self,
    ) -> Arc<services::material_requirements::MaterialRequirementsService> {
        self.services.material_requirements.clone()
    }
}
