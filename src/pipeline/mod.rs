pub mod research; // Research run orchestrator: scheduler + pipeline
pub mod providers; // Search and generation collaborators
