//! Static execution-affinity classification.
//!
//! Serialized methods touch engine-global state (context lifecycle,
//! navigation starts, synthetic input injection) and run one-at-a-time on
//! the dispatcher's own execution context. Parallel methods are confined
//! to a single open session and run on the worker pool.
//!
//! This table is tied to the stub engine's threading rules; a different
//! Render Backend must re-derive it from its own rules rather than copy
//! it.

use drover_protocol::CommandKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Serialized,
    Parallel,
}

pub fn affinity(kind: &CommandKind) -> Affinity {
    match kind {
        CommandKind::CreateContext { .. }
        | CommandKind::CloseContext { .. }
        | CommandKind::Navigate { .. }
        | CommandKind::Click { .. }
        | CommandKind::Type { .. }
        | CommandKind::Press { .. }
        | CommandKind::Select { .. }
        | CommandKind::Hover { .. }
        | CommandKind::Scroll { .. }
        | CommandKind::Upload { .. } => Affinity::Serialized,

        CommandKind::ReleaseContext { .. }
        | CommandKind::ListContexts
        | CommandKind::Ping
        | CommandKind::Evaluate { .. }
        | CommandKind::QueryState { .. }
        | CommandKind::GetText { .. }
        | CommandKind::Screenshot { .. } => Affinity::Parallel,

        // Handled by the dispatch loop itself; classified with the
        // lifecycle methods it belongs to.
        CommandKind::Shutdown => Affinity::Serialized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_protocol::Command;

    fn classify(line: &str) -> Affinity {
        affinity(&Command::parse_line(line).unwrap().kind)
    }

    #[test]
    fn lifecycle_and_input_methods_are_serialized() {
        assert_eq!(classify(r#"{"id":1,"method":"create_context"}"#), Affinity::Serialized);
        assert_eq!(
            classify(r#"{"id":1,"method":"close_context","context_id":"c"}"#),
            Affinity::Serialized
        );
        assert_eq!(
            classify(r#"{"id":1,"method":"navigate","context_id":"c","url":"u"}"#),
            Affinity::Serialized
        );
        assert_eq!(
            classify(r#"{"id":1,"method":"click","context_id":"c","selector":"s"}"#),
            Affinity::Serialized
        );
        assert_eq!(
            classify(r#"{"id":1,"method":"type","context_id":"c","selector":"s","text":"t"}"#),
            Affinity::Serialized
        );
        assert_eq!(
            classify(r#"{"id":1,"method":"scroll","context_id":"c"}"#),
            Affinity::Serialized
        );
    }

    #[test]
    fn confined_reads_are_parallel() {
        assert_eq!(
            classify(r#"{"id":1,"method":"release_context","context_id":"c"}"#),
            Affinity::Parallel
        );
        assert_eq!(classify(r#"{"id":1,"method":"list_contexts"}"#), Affinity::Parallel);
        assert_eq!(classify(r#"{"id":1,"method":"ping"}"#), Affinity::Parallel);
        assert_eq!(
            classify(r#"{"id":1,"method":"evaluate","context_id":"c","script":"1"}"#),
            Affinity::Parallel
        );
        assert_eq!(
            classify(r#"{"id":1,"method":"query_state","context_id":"c","selector":"s"}"#),
            Affinity::Parallel
        );
        assert_eq!(
            classify(r#"{"id":1,"method":"screenshot","context_id":"c"}"#),
            Affinity::Parallel
        );
    }
}
