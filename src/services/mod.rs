// Core lifecycle services
pub mod production_orders;
pub mod quality_inspections;

// Planning
pub mod material_requirements;

// External collaborators
pub mod stock_ledger;

// Service factory for dependency injection
pub mod factory;
