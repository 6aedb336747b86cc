// Btmitm Dispatch Router
// Chooses the outbound channel for each captured event

/// Outbound channel for a captured event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Unfiltered forward channel
    Forward,
    /// User/redirected forward channel
    UserForward,
}

/// Select the outbound channel from the current mode flags.
///
/// Sleep preparation takes precedence over redirection, so the redirected
/// channel is never signalled while the system prepares for sleep.
pub fn route(redirect_events: bool, preparing_for_sleep: bool) -> Route {
    if !redirect_events || preparing_for_sleep {
        Route::Forward
    } else {
        Route::UserForward
    }
}
