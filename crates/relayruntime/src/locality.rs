use relaycore::{Affinity, Destination, ProcessRole, TargetId};

/// Where a unit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Forward(Destination),
}

/// Decide whether a unit runs here or is shipped to another process.
///
/// `own_tab` is the tab served by the current process; it only matters
/// for content processes and is `None` everywhere else.
pub fn plan_route(
    affinity: Affinity,
    role: ProcessRole,
    active_tab: TargetId,
    own_tab: Option<TargetId>,
) -> Route {
    match (role, affinity) {
        // The popup may be torn down mid-operation (opening a tab closes it).
        (ProcessRole::Popup, _) => Route::Forward(Destination::Background),

        (ProcessRole::Content, Affinity::Background) => Route::Forward(Destination::Background),
        // Background relays it to the process of the active tab.
        (ProcessRole::Content, Affinity::Content) if own_tab != Some(active_tab) => {
            Route::Forward(Destination::Background)
        }

        (ProcessRole::Background, Affinity::Content) => {
            Route::Forward(Destination::Target(active_tab))
        }

        _ => Route::Local,
    }
}

/// Whether the content process must ask background which tab it serves.
pub(crate) fn needs_own_tab(affinity: Affinity, role: ProcessRole) -> bool {
    role == ProcessRole::Content && affinity == Affinity::Content
}
