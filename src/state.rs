use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::services::onboarding_service::OnboardingDriver;
use crate::store::RunHistoryStore;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub onboarding: Arc<OnboardingDriver>,
    pub run_history: Arc<dyn RunHistoryStore>,
}
