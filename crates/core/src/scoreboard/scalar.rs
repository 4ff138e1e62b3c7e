//! Scalar register scoreboard: one port-budget lane, tokens are
//! interned register names.

use std::collections::HashMap;
use std::collections::HashSet;

use super::{RegToken, Scoreboard};

/// An interned scalar register handle. Interning keeps scoreboard maps
/// keyed by a cheap `u32` instead of repeatedly hashing register-name
/// strings in the per-cycle hot path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScalarToken(u32);

impl RegToken for ScalarToken {
    fn lane(&self) -> usize {
        0
    }
}

/// Interns register names into [`ScalarToken`]s.
#[derive(Debug, Default)]
pub struct ScalarRegisterArena {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl ScalarRegisterArena {
    /// Intern `name`, returning its stable token.
    pub fn intern(&mut self, name: &str) -> ScalarToken {
        if let Some(&id) = self.ids.get(name) {
            return ScalarToken(id);
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        ScalarToken(id)
    }

    /// Intern a whole register-name list, preserving order.
    pub fn intern_all(&mut self, names: &[String]) -> Vec<ScalarToken> {
        names.iter().map(|n| self.intern(n)).collect()
    }
}

/// Scalar register scoreboard: `Scoreboard<ScalarToken>` with one port
/// budget lane.
pub type ScalarScoreboard = Scoreboard<ScalarToken>;

/// Construct a scalar scoreboard, expanding named dedicated-port
/// registers into their interned tokens.
pub fn new_scalar_scoreboard(
    arena: &mut ScalarRegisterArena,
    read_ports: Option<usize>,
    write_ports: Option<usize>,
    dedicated_read_ports: &[String],
    dedicated_write_ports: &[String],
) -> ScalarScoreboard {
    let dedicated_read: HashSet<ScalarToken> =
        arena.intern_all(dedicated_read_ports).into_iter().collect();
    let dedicated_write: HashSet<ScalarToken> = arena
        .intern_all(dedicated_write_ports)
        .into_iter()
        .collect();
    Scoreboard::new(1, read_ports, write_ports, dedicated_read, dedicated_write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_deduplicates() {
        let mut arena = ScalarRegisterArena::default();
        let a = arena.intern("x1");
        let b = arena.intern("x2");
        let a2 = arena.intern("x1");
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }
}
