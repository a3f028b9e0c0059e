//! Register allocation for one scope.

use super::opcode::FAR_SLOT_MAX;

/// A growable bitset of registers in use, plus a high-water mark.
///
/// Allocation always takes the lowest free register, which keeps values in
/// reach of single byte operands for as long as possible.
#[derive(Debug, Clone, Default)]
pub struct RegisterAllocator {
    words: Vec<u32>,
    /// one past the highest register ever allocated
    high_water: u32,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest free register `<= max`, or `None` if every one of them is taken.
    pub fn alloc_near(&mut self, max: u32) -> Option<u32> {
        let index = self.first_clear(max)?;
        self.touch(index);
        Some(index)
    }

    /// Lowest free register anywhere a 16 bit operand can reach.
    pub fn alloc(&mut self) -> Option<u32> {
        self.alloc_near(FAR_SLOT_MAX)
    }

    /// Marks `index` as in use.
    pub fn touch(&mut self, index: u32) {
        let (word, bit) = Self::position(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
        self.high_water = self.high_water.max(index + 1);
    }

    pub fn free(&mut self, index: u32) {
        let (word, bit) = Self::position(index);
        if let Some(word) = self.words.get_mut(word) {
            *word &= !(1 << bit);
        }
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        let (word, bit) = Self::position(index);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    /// Raises the high-water mark to at least `mark`, for registers a
    /// nested block used after it was popped.
    pub fn raise_high_water(&mut self, mark: u32) {
        self.high_water = self.high_water.max(mark);
    }

    fn position(index: u32) -> (usize, u32) {
        ((index / u32::BITS) as usize, index % u32::BITS)
    }

    fn first_clear(&self, max: u32) -> Option<u32> {
        let found = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u32::MAX)
            .map(|(i, word)| i as u32 * u32::BITS + word.trailing_ones())
            // every word is full, so the next free register starts a new one
            .unwrap_or(self.words.len() as u32 * u32::BITS);
        (found <= max).then_some(found)
    }
}

#[cfg(test)]
mod tests {
    use arbitrary::Arbitrary;
    use arbtest::arbtest;
    use assert2::check;

    use super::RegisterAllocator;

    #[test]
    fn lowest_first() {
        let mut ra = RegisterAllocator::new();
        check!(ra.alloc_near(0xFF) == Some(0));
        check!(ra.alloc_near(0xFF) == Some(1));
        check!(ra.alloc_near(0xFF) == Some(2));
        ra.free(1);
        check!(ra.alloc_near(0xFF) == Some(1));
        check!(ra.alloc_near(0xFF) == Some(3));
        check!(ra.high_water() == 4);
    }

    #[test]
    fn respects_max() {
        let mut ra = RegisterAllocator::new();
        for i in 0..=3 {
            check!(ra.alloc_near(3) == Some(i));
        }
        check!(ra.alloc_near(3) == None);
        // a failed allocation leaves no trace
        check!(ra.high_water() == 4);
        check!(ra.alloc_near(4) == Some(4));
    }

    #[test]
    fn crosses_word_boundaries() {
        let mut ra = RegisterAllocator::new();
        for i in 0..70 {
            check!(ra.alloc() == Some(i));
        }
        ra.free(33);
        check!(ra.alloc() == Some(33));
        check!(ra.alloc() == Some(70));
        check!(ra.is_allocated(69));
        check!(!ra.is_allocated(71));
    }

    #[derive(Debug, Arbitrary)]
    enum Step {
        Alloc { max: u8 },
        Free { nth: u8 },
    }

    #[test]
    fn freed_registers_come_back_lowest_first() {
        arbtest(|u| {
            let steps: Vec<Step> = u.arbitrary()?;
            let mut ra = RegisterAllocator::new();
            let mut live = std::collections::BTreeSet::new();

            for step in steps {
                match step {
                    Step::Alloc { max } => {
                        let max = max as u32;
                        let expected = (0..=max).find(|i| !live.contains(i));
                        let got = ra.alloc_near(max);
                        assert!(got == expected, "expected {expected:?}, got {got:?}");
                        if let Some(index) = got {
                            live.insert(index);
                        }
                    }
                    Step::Free { nth } if !live.is_empty() => {
                        let index = *live.iter().nth(nth as usize % live.len()).unwrap();
                        live.remove(&index);
                        ra.free(index);
                    }
                    Step::Free { .. } => {}
                }
                for index in 0..=0xFF {
                    assert!(ra.is_allocated(index) == live.contains(&index));
                }
            }
            Ok(())
        });
    }
}
