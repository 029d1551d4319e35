/// Classification for how a sync controller treats an error.
///
/// # Behavior Summary
///
/// | Class | Keeps displayed value? | Recorded as `last_error`? | Controller keeps running? |
/// |-------|------------------------|---------------------------|---------------------------|
/// | `Terminal` | Yes | Yes | No (until re-authenticated) |
/// | `Soft` | Yes | Yes | Yes |
/// | `Silent` | Yes | No | Yes |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// The controller cannot continue for this subject.
    ///
    /// Only a missing or rejected identity lands here. The channel and the
    /// fallback timer are stopped; a later refresh retries subject resolution.
    Terminal,

    /// Recorded next to the last-known-good value.
    ///
    /// Rate limiting, transport loss and backend failures are all soft: the
    /// UI may show a banner, but data already on screen stays.
    Soft,

    /// Never surfaced at all.
    ///
    /// A cancelled fetch resolves into this class; its outcome is dropped.
    Silent,
}
