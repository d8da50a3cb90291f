use serde_json::Value;

/// Receives stage notifications from the pipeline, e.g. to drive a spinner.
pub trait PipelineObserver: Send + Sync {
    /// A long-running stage is starting.
    fn start_step(&self, name: &str);

    /// The stage finished, successfully or not.
    fn end_step(&self, name: &str);

    /// A produced artifact (template, code, video reference) worth showing.
    fn render_artifact(&self, kind: &str, data: &Value);

    fn log_info(&self, msg: &str);

    fn log_error(&self, msg: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn start_step(&self, _name: &str) {}
    fn end_step(&self, _name: &str) {}
    fn render_artifact(&self, _kind: &str, _data: &Value) {}
    fn log_info(&self, _msg: &str) {}
    fn log_error(&self, _msg: &str) {}
}

// Exposed for testing
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every notification as `"<kind>:<text>"`.
    #[derive(Default, Clone)]
    pub struct RecordingObserver {
        pub events: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl PipelineObserver for RecordingObserver {
        fn start_step(&self, name: &str) {
            self.push(format!("start:{}", name));
        }

        fn end_step(&self, name: &str) {
            self.push(format!("end:{}", name));
        }

        fn render_artifact(&self, kind: &str, _data: &Value) {
            self.push(format!("artifact:{}", kind));
        }

        fn log_info(&self, msg: &str) {
            self.push(format!("info:{}", msg));
        }

        fn log_error(&self, msg: &str) {
            self.push(format!("error:{}", msg));
        }
    }
}
