//! Exception handler representation for CIL method bodies.
//!
//! Handler boundaries are stored as [`InstrId`]s into the owning body, so the protected region
//! and the handler block follow their instructions when stages rewrite the body. A boundary whose
//! id is no longer live is dangling and is the repairer's business.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::assembly::InstrId;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// `catch_type` names the exception type this handler catches.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        ///
        /// The filter code at `filter_start` runs before the handler to decide whether the
        /// exception is handled.
        const FILTER = 0x0001;

        /// A finally clause.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a protected region and its handling block.
///
/// # Layout
///
/// ```text
/// try_start .. try_end            protected region, try_end exclusive
/// handler_start .. handler_end    handler block, handler_end exclusive
/// ```
///
/// `handler_end == None` means the handler runs to the end of the body, mirroring a null
/// handler end in the binary format. A structurally valid handler satisfies
/// `try_start < try_end <= handler_start < handler_end` in sequence order.
///
/// # Reference
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected region.
    pub try_start: InstrId,
    /// First instruction after the protected region.
    pub try_end: InstrId,
    /// First instruction of the handler block.
    pub handler_start: InstrId,
    /// First instruction after the handler block; `None` for end of body.
    #[serde(default)]
    pub handler_end: Option<InstrId>,
    /// First instruction of the filter block, for `FILTER` handlers.
    #[serde(default)]
    pub filter_start: Option<InstrId>,
    /// Full name of the caught exception type, for `EXCEPTION` handlers.
    #[serde(default)]
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    /// Creates a typed catch clause.
    #[must_use]
    pub fn catch(
        try_start: InstrId,
        try_end: InstrId,
        handler_start: InstrId,
        handler_end: Option<InstrId>,
        catch_type: impl Into<String>,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end,
            handler_start,
            handler_end,
            filter_start: None,
            catch_type: Some(catch_type.into()),
        }
    }

    /// Creates a finally clause.
    #[must_use]
    pub fn finally(
        try_start: InstrId,
        try_end: InstrId,
        handler_start: InstrId,
        handler_end: Option<InstrId>,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start,
            try_end,
            handler_start,
            handler_end,
            filter_start: None,
            catch_type: None,
        }
    }

    /// Returns `true` for filter clauses.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// Every instruction reference this handler holds.
    pub fn boundaries(&self) -> impl Iterator<Item = InstrId> + '_ {
        [Some(self.try_start), Some(self.try_end), Some(self.handler_start)]
            .into_iter()
            .chain([self.handler_end, self.filter_start])
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        let mut handler =
            ExceptionHandler::catch(InstrId(0), InstrId(2), InstrId(2), None, "System.Exception");
        assert_eq!(handler.boundaries().count(), 3);
        assert!(!handler.is_filter());

        handler.flags = ExceptionHandlerFlags::FILTER;
        handler.filter_start = Some(InstrId(1));
        handler.handler_end = Some(InstrId(4));
        let ids: Vec<_> = handler.boundaries().collect();
        assert_eq!(
            ids,
            vec![InstrId(0), InstrId(2), InstrId(2), InstrId(4), InstrId(1)]
        );
        assert!(handler.is_filter());
    }

    #[test]
    fn test_flags_serde() {
        let handler = ExceptionHandler::finally(InstrId(0), InstrId(1), InstrId(1), None);
        let json = serde_json::to_string(&handler).unwrap();
        let back: ExceptionHandler = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handler);
        assert_eq!(back.flags, ExceptionHandlerFlags::FINALLY);
    }
}
