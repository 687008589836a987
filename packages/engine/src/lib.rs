//! Course Replication & Challenge Progression Engine.
//!
//! Every exposed operation takes an [`state::EngineState`] and returns
//! [`error::Result`]; failures carry a stable code via [`error::EngineError::code`].

pub mod access;
pub mod badges;
pub mod challenge;
pub mod config;
pub mod courses;
pub mod database;
pub mod entity;
pub mod error;
pub mod invitations;
pub mod metrics;
pub mod notify;
pub mod provisioning;
pub mod replication;
pub mod scoring;
pub mod seed;
pub mod state;
pub mod users;

pub use access::{AccessLevel, check_access, downgrade_sync_to_copy, grant_access, remove_access};
pub use badges::{award_badge, check_and_award_badges, check_badge_eligibility, create_badge};
pub use challenge::{
    activate_challenge, complete_challenge, create_challenge, delete_challenge, join_challenge,
    leave_challenge, process_scheduled_transitions, update_participant_progress,
};
pub use courses::delete_course;
pub use error::{EngineError, ErrorBody, Result};
pub use replication::{CloneOptions, ClonePhase, CloneProgress, clone_course, clone_project};
pub use scoring::{compute_leaderboard, record_evaluation};
pub use state::EngineState;
