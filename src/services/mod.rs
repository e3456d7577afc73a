pub mod activity_execution_service;
pub mod activity_service;
pub mod arrangement_service;
pub mod dataset_service;
pub mod entity_service;
pub mod experiment_service;
pub mod factory;
pub mod measure_name_service;
pub mod measure_service;
pub mod participant_service;
pub mod participant_state_service;
pub mod participation_service;
pub mod personality_service;
pub mod scenario_service;
pub mod time_series_service;

pub use activity_execution_service::ActivityExecutionService;
pub use activity_service::ActivityService;
pub use arrangement_service::ArrangementService;
pub use dataset_service::DatasetService;
pub use entity_service::{Entity, EntityService, ExpandContext, NoExpansion, RelationExpander};
pub use experiment_service::ExperimentService;
pub use factory::ServiceFactory;
pub use measure_name_service::MeasureNameService;
pub use measure_service::MeasureService;
pub use participant_service::ParticipantService;
pub use participant_state_service::ParticipantStateService;
pub use participation_service::ParticipationService;
pub use personality_service::PersonalityService;
pub use scenario_service::ScenarioService;
pub use time_series_service::TimeSeriesService;
