pub mod feature;
pub mod naming;
pub mod project;
pub mod record;

pub use feature::{
    Aggregate, AnalyticsConfig, AuthConfig, AuthFlags, CrudConfig, ExtraField, FeatureConfiguration,
    FeatureKind, FeaturePayload, FieldSpec, FieldType, FunctionConfig, Report, ReportMode,
};
pub use project::ProjectInfo;
pub use record::{HandlerContext, StoredRecord, auth_feature_key, crud_feature_key};
