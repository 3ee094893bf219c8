pub mod artifact_store;
pub mod cancel;
pub mod comfy;
pub mod gate;
pub mod job_client;
pub mod orchestrator;
pub mod template;
