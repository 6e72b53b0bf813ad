use crate::api::live::LiveRuns;
use crate::engine::{Engine, Pacing};
use crate::executor::CaseExecutor;
use crate::observer::TracingObserver;
use crate::storage::RunStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn RunStore>,
    pub live: Arc<LiveRuns>,
}

impl AppState {
    /// Build the engine with the live-run and tracing observers attached.
    pub fn new(store: Arc<dyn RunStore>, executor: CaseExecutor, pacing: Pacing) -> Self {
        let live = Arc::new(LiveRuns::default());
        let engine = Engine::new(store.clone(), executor)
            .with_pacing(pacing)
            .with_observer(live.clone())
            .with_observer(Arc::new(TracingObserver));
        Self {
            engine: Arc::new(engine),
            store,
            live,
        }
    }
}
