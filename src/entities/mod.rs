// Base data
pub mod material;

// Bill of materials
pub mod bom;
pub mod bom_line;

// Production
pub mod production_order;

// Quality
pub mod inspection_item;
pub mod quality_inspection;

// External stock ledger snapshot (read-only)
pub mod stock_balance;
