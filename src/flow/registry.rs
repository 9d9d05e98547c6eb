// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;

use crate::flow::graph::RouterFn;
use crate::flow::state::WorkflowState;
use crate::stage::Stage;

/// Named stages and routers that graph definitions refer to
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
    routers: HashMap<String, RouterFn>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage under its own name
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        let name = stage.name().to_string();
        self.stages.insert(name, stage);
    }

    /// Register a stage under an explicit name
    pub fn register_as(&mut self, name: impl Into<String>, stage: Arc<dyn Stage>) {
        self.stages.insert(name.into(), stage);
    }

    /// Register a router function
    pub fn register_router<F>(&mut self, name: impl Into<String>, router: F)
    where
        F: Fn(&WorkflowState) -> String + Send + Sync + 'static,
    {
        self.routers.insert(name.into(), Arc::new(router));
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.register(stage);
        self
    }

    pub fn stage(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(name).cloned()
    }

    pub fn router(&self, name: &str) -> Option<RouterFn> {
        self.routers.get(name).cloned()
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn has_router(&self, name: &str) -> bool {
        self.routers.contains_key(name)
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<_> = self.stages.keys().collect();
        stages.sort();
        let mut routers: Vec<_> = self.routers.keys().collect();
        routers.sort();
        f.debug_struct("StageRegistry")
            .field("stages", &stages)
            .field("routers", &routers)
            .finish()
    }
}
