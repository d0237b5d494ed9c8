pub mod compute;
pub mod config;
pub mod error;
pub mod health;
pub mod monitoring;
pub mod ops;
pub mod pricing;
pub mod state;
pub mod validation;

pub use compute::{InstanceSelection, SavingsComparison, SpotAnalysis};
pub use config::{AmiVariant, Architecture, DeploymentConfig, OsType, Tier};
pub use error::DomainError;
pub use health::{HealthCheckConfig, HealthCheckResult};
pub use monitoring::{
    HealthEvent, HealthEventKind, MonitoringState, ServiceMetrics, ServiceStatus,
};
pub use ops::{
    CleanupReport, DeletedResource, DestructionResult, OrphanedResource, PreservedResource,
    RollbackResult, UpdateRequest, UpdateResult,
};
pub use pricing::{
    AlbPricing, CdnPricing, EfsPricing, OnDemandPrice, PriceSource, PricingResult, SpotPrice,
};
pub use state::{
    CostTracking, DeploymentState, DeploymentStatus, Provenance, ResourceKind,
    ResourceProvenance, RollbackRecord, RollbackTrigger, STATE_SCHEMA_VERSION,
};
pub use validation::{
    OverallStatus, Severity, ValidationCheck, ValidationReport, ValidationSummary,
};
