use std::sync::Arc;

use crate::config::StoreConfig;
use crate::storage::StorageGateway;

use super::activity_execution_service::ActivityExecutionService;
use super::activity_service::ActivityService;
use super::arrangement_service::ArrangementService;
use super::dataset_service::DatasetService;
use super::experiment_service::ExperimentService;
use super::measure_name_service::MeasureNameService;
use super::measure_service::MeasureService;
use super::participant_service::ParticipantService;
use super::participant_state_service::ParticipantStateService;
use super::participation_service::ParticipationService;
use super::personality_service::PersonalityService;
use super::scenario_service::ScenarioService;
use super::time_series_service::TimeSeriesService;

/// Construction seam for the service layer: one shared gateway handle, one
/// config, one accessor per service. Services are cheap to construct, so each
/// accessor builds a fresh instance over the shared gateway.
pub struct ServiceFactory {
    gateway: Arc<dyn StorageGateway>,
    config: StoreConfig,
}

impl ServiceFactory {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        ServiceFactory {
            gateway,
            config: StoreConfig::default(),
        }
    }

    pub fn with_config(gateway: Arc<dyn StorageGateway>, config: StoreConfig) -> Self {
        ServiceFactory { gateway, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Caps a caller-requested traversal depth at the configured maximum.
    /// Depth exhaustion is the only bound on recursive expansion, so entry
    /// points should run requested depths through this.
    pub fn clamp_depth(&self, requested: i64) -> i64 {
        self.config.clamp_depth(requested)
    }

    pub fn datasets(&self) -> DatasetService {
        DatasetService::new(self.gateway.clone(), self.config.registry_dataset.clone())
    }

    pub fn experiments(&self) -> ExperimentService {
        ExperimentService::new(self.gateway.clone())
    }

    pub fn scenarios(&self) -> ScenarioService {
        ScenarioService::new(self.gateway.clone())
    }

    pub fn activities(&self) -> ActivityService {
        ActivityService::new(self.gateway.clone())
    }

    pub fn activity_executions(&self) -> ActivityExecutionService {
        ActivityExecutionService::new(self.gateway.clone())
    }

    pub fn arrangements(&self) -> ArrangementService {
        ArrangementService::new(self.gateway.clone())
    }

    pub fn participants(&self) -> ParticipantService {
        ParticipantService::new(self.gateway.clone())
    }

    pub fn participant_states(&self) -> ParticipantStateService {
        ParticipantStateService::new(self.gateway.clone())
    }

    pub fn participations(&self) -> ParticipationService {
        ParticipationService::new(self.gateway.clone())
    }

    pub fn personalities(&self) -> PersonalityService {
        PersonalityService::new(self.gateway.clone())
    }

    pub fn measures(&self) -> MeasureService {
        MeasureService::new(self.gateway.clone())
    }

    pub fn measure_names(&self) -> MeasureNameService {
        MeasureNameService::new(self.gateway.clone())
    }

    pub fn time_series(&self) -> TimeSeriesService {
        TimeSeriesService::new(self.gateway.clone())
    }
}
