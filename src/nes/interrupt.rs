/// Interrupt kinds the CPU accepts, ordered by dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Interrupt {
    Irq,
    Nmi,
    Reset,
}

impl Interrupt {
    pub fn vector(self) -> u16 {
        match self {
            Interrupt::Nmi => 0xFFFA,
            Interrupt::Reset => 0xFFFC,
            Interrupt::Irq => 0xFFFE,
        }
    }

    /// Merge a new request into the single pending slot. A request only
    /// replaces the current one when it has strictly higher priority.
    pub fn merge(pending: Option<Interrupt>, request: Interrupt) -> Option<Interrupt> {
        match pending {
            Some(current) if current >= request => Some(current),
            _ => Some(request),
        }
    }
}

/// Output pin a device drives toward the CPU. Devices own their line; the
/// machine samples it after each step and forwards it as a request.
#[derive(Debug, Clone, Default)]
pub struct InterruptLine {
    raised: bool,
}

impl InterruptLine {
    pub fn raise(&mut self) {
        self.raised = true;
    }

    pub fn lower(&mut self) {
        self.raised = false;
    }

    pub fn set(&mut self, level: bool) {
        self.raised = level;
    }

    pub fn is_raised(&self) -> bool {
        self.raised
    }

    /// Edge-style consumption for NMI.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_overwrites() {
        let slot = Interrupt::merge(None, Interrupt::Irq);
        let slot = Interrupt::merge(slot, Interrupt::Nmi);
        assert_eq!(slot, Some(Interrupt::Nmi));
        let slot = Interrupt::merge(slot, Interrupt::Reset);
        assert_eq!(slot, Some(Interrupt::Reset));
    }

    #[test]
    fn lower_or_equal_priority_is_ignored() {
        let slot = Interrupt::merge(Some(Interrupt::Nmi), Interrupt::Irq);
        assert_eq!(slot, Some(Interrupt::Nmi));
        let slot = Interrupt::merge(slot, Interrupt::Nmi);
        assert_eq!(slot, Some(Interrupt::Nmi));
    }

    #[test]
    fn take_clears_line() {
        let mut line = InterruptLine::default();
        line.raise();
        assert!(line.take());
        assert!(!line.take());
    }
}
