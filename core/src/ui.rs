//! Seam to whatever surface talks to the human. User responses come back
//! through `Orchestrator::provide_user_response`.

pub trait UserInterface: Send + Sync {
    fn display_feedback(&self, message: &str);
}
