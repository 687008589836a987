pub mod access_grant;
pub mod badge;
pub mod batch;
pub mod challenge;
pub mod challenge_invite;
pub mod challenge_participant;
pub mod challenge_request;
pub mod clone_saga;
pub mod course;
pub mod course_invite;
pub mod project;
pub mod step;
pub mod user;
pub mod user_badge;
pub mod user_stats;
