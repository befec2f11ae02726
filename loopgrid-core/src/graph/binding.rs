/// Two-phase allocation state: reserve first, then wire.
///
/// A reservation blocks other claimants while wiring is in progress, so a
/// slot is never observed as free between the two phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding<R, W> {
    Vacant,
    Reserved(R),
    Wired(W),
}

impl<R, W> Default for Binding<R, W> {
    fn default() -> Self {
        Self::Vacant
    }
}

impl<R, W> Binding<R, W> {
    pub fn is_vacant(&self) -> bool {
        matches!(self, Self::Vacant)
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved(_))
    }

    pub fn is_wired(&self) -> bool {
        matches!(self, Self::Wired(_))
    }

    /// Claim a vacant binding. Returns false if already claimed.
    pub fn reserve(&mut self, reservation: R) -> bool {
        if !self.is_vacant() {
            return false;
        }
        *self = Self::Reserved(reservation);
        true
    }

    /// Complete a reservation. Returns the wiring back if nothing was reserved.
    pub fn wire(&mut self, wiring: W) -> Result<(), W> {
        if !self.is_reserved() {
            return Err(wiring);
        }
        *self = Self::Wired(wiring);
        Ok(())
    }

    /// Vacate the binding, returning whatever it held.
    pub fn release(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn wired(&self) -> Option<&W> {
        match self {
            Self::Wired(w) => Some(w),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_wire() {
        let mut binding: Binding<(), u32> = Binding::default();
        assert!(binding.reserve(()));
        assert!(!binding.reserve(()));
        assert_eq!(binding.wire(7), Ok(()));
        assert_eq!(binding.wired(), Some(&7));
    }

    #[test]
    fn wire_without_reservation_fails() {
        let mut binding: Binding<(), u32> = Binding::Vacant;
        assert_eq!(binding.wire(3), Err(3));
        assert!(binding.is_vacant());
    }

    #[test]
    fn release_returns_previous() {
        let mut binding: Binding<u8, u32> = Binding::Vacant;
        binding.reserve(1);
        assert_eq!(binding.release(), Binding::Reserved(1));
        assert!(binding.is_vacant());
    }
}
