//! Autonomous Learning System
//!
//! Observes the runtime outcomes of deployed artifacts and evolves durable
//! knowledge from them:
//! 1. **Record**: failures, successes and insights per subject
//! 2. **Resolve**: a resolution turns a failure into a reusable pattern
//! 3. **Reinforce**: later successes raise a pattern's use count
//! 4. **Crystallize**: heavily reused patterns become permanent skills
//! 5. **Prune**: knowledge nobody references expires

mod background;
mod learner;

pub use background::{
    known_resolution, CrystallizeError, Crystallizer, LearningMaintenance, MaintenanceConfig,
    MaintenanceStats, MaintenanceTask, KNOWN_RESOLUTIONS,
};
pub use learner::{
    EntryKind, EntryType, LearningConfig, LearningEngine, LearningEntry, LearningError,
    LearningResult, LearningStats,
};
