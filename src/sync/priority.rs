//! Priority derivation for tickets created from inbound messages

use crate::types::{Importance, TicketPriority};

/// Derive a ticket priority from the message importance flag and subject.
///
/// High-importance messages and urgent-keyword subjects map to high,
/// important-keyword subjects to medium, everything else to low. Keyword
/// matching is a case-insensitive substring test, so accented forms must be
/// listed explicitly in the configuration.
pub fn derive_priority(
    importance: Importance,
    subject: &str,
    urgent_keywords: &[String],
    important_keywords: &[String],
) -> TicketPriority {
    if importance == Importance::High {
        return TicketPriority::High;
    }

    let subject = subject.to_lowercase();
    if urgent_keywords
        .iter()
        .any(|kw| subject.contains(&kw.to_lowercase()))
    {
        return TicketPriority::High;
    }
    if important_keywords
        .iter()
        .any(|kw| subject.contains(&kw.to_lowercase()))
    {
        return TicketPriority::Medium;
    }

    TicketPriority::Low
}
