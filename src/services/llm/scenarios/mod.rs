pub mod architecture;
pub mod categorize;
pub mod crash_analysis;
pub mod query_plan;
pub mod selection;
