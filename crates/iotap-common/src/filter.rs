use crate::maps::PRINT_ALL_ENABLED;

/// Read access to the control tables.
///
/// Tables are written concurrently by the control plane: every method reads
/// the current value of a single key and nothing more. There's no consistency
/// between two calls, even on the same table.
pub trait ControlTables {
    /// Membership in the exclusion set.
    fn excluded(&self, pid: u32) -> bool;

    /// Raw value of the broadcast cell, `None` when it was never written.
    fn broadcast_flag(&self) -> Option<u32>;

    /// Membership in the allow set.
    fn targeted(&self, pid: u32) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Emit,
    Suppress,
}

/// Decide if an invocation of `pid` should produce an event.
///
/// Rules are checked in order and the first match wins:
/// 1. excluded pids are always suppressed, broadcast mode included
/// 2. broadcast mode emits everything else
/// 3. otherwise only targeted pids are emitted
///
/// Each table is read at most once.
#[inline(always)]
pub fn decide<T: ControlTables + ?Sized>(tables: &T, pid: u32) -> Decision {
    if tables.excluded(pid) {
        return Decision::Suppress;
    }
    if tables.broadcast_flag() == Some(PRINT_ALL_ENABLED) {
        return Decision::Emit;
    }
    if tables.targeted(pid) {
        Decision::Emit
    } else {
        Decision::Suppress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemTables;

    #[test]
    fn excluded_wins_over_everything() {
        let tables = MemTables::default()
            .exclude(&[1, 2])
            .target(&[1, 2])
            .broadcast(Some(PRINT_ALL_ENABLED));
        for pid in [1, 2] {
            assert_eq!(decide(&tables, pid), Decision::Suppress);
        }
        assert_eq!(decide(&tables, 3), Decision::Emit);
    }

    #[test]
    fn broadcast_emits_every_pid() {
        let tables = MemTables::default().broadcast(Some(PRINT_ALL_ENABLED));
        for pid in [0, 1, 4242, u32::MAX] {
            assert_eq!(decide(&tables, pid), Decision::Emit);
        }
    }

    #[test]
    fn allow_list_governs_without_broadcast() {
        for flag in [None, Some(0)] {
            let tables = MemTables::default().target(&[10]).broadcast(flag);
            assert_eq!(decide(&tables, 10), Decision::Emit);
            assert_eq!(decide(&tables, 11), Decision::Suppress);
        }
    }

    #[test]
    fn only_the_enabled_value_means_broadcast() {
        let tables = MemTables::default().broadcast(Some(7));
        assert_eq!(decide(&tables, 1), Decision::Suppress);
    }

    #[test]
    fn excluded_pid_skips_other_lookups() {
        let tables = MemTables::default().exclude(&[5]);
        assert_eq!(decide(&tables, 5), Decision::Suppress);
        assert_eq!(tables.lookups(), 1);
    }

    #[test]
    fn each_table_read_at_most_once() {
        let tables = MemTables::default();
        assert_eq!(decide(&tables, 5), Decision::Suppress);
        assert_eq!(tables.lookups(), 3);
    }
}
