#[path = "e2e/language_fallback.rs"]
mod language_fallback;

#[path = "e2e/feature_workspace.rs"]
mod feature_workspace;

#[path = "e2e/replay.rs"]
mod replay;

#[path = "e2e/partial_removal.rs"]
mod partial_removal;

#[path = "e2e/concurrent_appends.rs"]
mod concurrent_appends;

#[path = "e2e/workspace_lifecycle.rs"]
mod workspace_lifecycle;
