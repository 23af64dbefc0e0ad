use core::fmt;

/// A contiguous chunk of absent data, followed by a contiguous chunk of present data.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contig {
    hole_size: u32,
    data_size: u32,
}

/// Tracks which bytes ahead of a stream's front have arrived out of order.
///
/// Offsets are relative to the first byte that has not yet arrived in order. The number of
/// disjoint data ranges is bounded; a range that would need an additional one is refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembler {
    contigs: Vec<Contig>,
    max_contigs: usize,
}

/// The range could not be recorded without exceeding the bound on ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TooManyHoles;

impl Contig {
    fn hole_and_data(hole_size: u32, data_size: u32) -> Contig {
        Contig { hole_size, data_size }
    }

    fn total_size(&self) -> u32 {
        self.hole_size + self.data_size
    }
}

impl fmt::Display for Contig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.hole_size != 0 { write!(f, "({})", self.hole_size)?; }
        if self.hole_size != 0 && self.data_size != 0 { write!(f, " ")?; }
        if self.data_size != 0 { write!(f, "{}", self.data_size)?; }
        Ok(())
    }
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        for contig in self.contigs.iter() {
            write!(f, "{} ", contig)?;
        }
        write!(f, "]")
    }
}

impl Assembler {
    /// An assembler without out-of-order data that records at most `max_contigs` ranges.
    pub fn new(max_contigs: usize) -> Self {
        Assembler { contigs: Vec::new(), max_contigs: max_contigs.max(1) }
    }

    /// Return whether no out-of-order data is held.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    /// Forget all out-of-order data.
    pub fn clear(&mut self) {
        self.contigs.clear()
    }

    /// Add a range of received bytes.
    ///
    /// Returns the number of bytes that became contiguous at the front, which are removed from
    /// the assembler. Their offsets are subtracted from all remaining ranges.
    pub fn add(&mut self, start: u32, size: u32) -> Result<u32, TooManyHoles> {
        if size == 0 {
            return Ok(0);
        }
        let mut ranges: Vec<(u32, u32)> = self.iter_data().collect();
        let end = start.saturating_add(size);

        // Merge every range touching [start, end).
        let mut merged = (start, end);
        ranges.retain(|&(left, right)| {
            if right < merged.0 || left > merged.1 {
                true
            } else {
                merged.0 = merged.0.min(left);
                merged.1 = merged.1.max(right);
                false
            }
        });
        let at = ranges.iter().position(|&(left, _)| left > merged.0).unwrap_or(ranges.len());
        ranges.insert(at, merged);

        let mut advanced = 0;
        if ranges[0].0 == 0 {
            advanced = ranges.remove(0).1;
            for range in ranges.iter_mut() {
                range.0 -= advanced;
                range.1 -= advanced;
            }
        }

        if ranges.len() > self.max_contigs {
            return Err(TooManyHoles);
        }

        self.set_ranges(&ranges);
        Ok(advanced)
    }

    /// Account for bytes that arrived in order without passing through the assembler.
    ///
    /// Returns the number of held bytes that directly follow them and are now in order as well.
    pub fn advance(&mut self, count: u32) -> u32 {
        let mut ranges: Vec<(u32, u32)> = self.iter_data()
            .filter(|&(_, right)| right > count)
            .map(|(left, right)| (left.max(count) - count, right - count))
            .collect();
        let mut advanced = 0;
        if ranges.first().map_or(false, |range| range.0 == 0) {
            advanced = ranges.remove(0).1;
            for range in ranges.iter_mut() {
                range.0 -= advanced;
                range.1 -= advanced;
            }
        }
        self.set_ranges(&ranges);
        advanced
    }

    fn set_ranges(&mut self, ranges: &[(u32, u32)]) {
        self.contigs.clear();
        let mut last = 0;
        for &(left, right) in ranges {
            self.contigs.push(Contig::hole_and_data(left - last, right - left));
            last = right;
        }
    }

    /// Iterate over all of the contiguous data ranges.
    ///
    /// ```text
    ///    Hole        Data        Hole        Data
    /// |--- 100 ---|--- 100 ---|--- 100 ---|--- 100 ---|
    /// ```
    ///
    /// This would return the ranges: ``(100, 200), (300, 400)``
    pub fn iter_data(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.contigs.iter().scan(0u32, |offset, contig| {
            let left = *offset + contig.hole_size;
            *offset += contig.total_size();
            Some((left, *offset))
        })
    }
}
