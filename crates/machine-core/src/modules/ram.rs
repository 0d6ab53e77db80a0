//! Cell-addressed memory with multi-cell big-endian data access.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use super::register::check_width;
use crate::component::impl_component;
use crate::convert::{fits_in_bits, mask, sign_extend, to_unsigned};
use crate::{ComponentId, MachineId, SimError, SimResult};

/// Assembly source position a cell was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SourceLine {
    /// One-based line number.
    pub line: u32,
    /// Source file, when known.
    pub file: Option<String>,
}

/// One addressable cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RamLocation {
    /// Cell index.
    pub address: u32,
    value: i64,
    /// Free-form annotation shown next to the cell.
    pub comment: String,
    /// Whether a run stops when the program counter reaches this cell.
    pub breakpoint: bool,
    /// Where the cell's contents came from.
    pub source_line: Option<SourceLine>,
}

impl RamLocation {
    /// Cell contents, already masked to the cell size.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.value
    }
}

/// A cell whose contents changed in the most recent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CellChange {
    /// Cell index.
    pub address: u32,
    /// Contents before the write.
    pub previous: i64,
    /// Contents after the write.
    pub current: i64,
}

/// Random-access memory of `cell_size`-bit cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ram {
    pub(crate) id: ComponentId,
    pub(crate) owner: MachineId,
    pub(crate) name: String,
    cell_size: u32,
    cells: Vec<RamLocation>,
    halt_at_breaks: bool,
    last_changes: Vec<CellChange>,
}

impl_component!(Ram);

impl Ram {
    pub(crate) fn new(
        id: ComponentId,
        owner: MachineId,
        name: String,
        length: usize,
        cell_size: u32,
    ) -> SimResult<Self> {
        check_width(cell_size)?;
        let mut ram = Self {
            id,
            owner,
            name,
            cell_size,
            cells: Vec::new(),
            halt_at_breaks: true,
            last_changes: Vec::new(),
        };
        ram.resize(length)?;
        Ok(ram)
    }

    /// Number of cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` for a RAM with no cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Bits per cell (`1..=64`).
    #[must_use]
    pub const fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// All-ones mask of one cell: `2^cell_size - 1`.
    #[must_use]
    pub const fn cell_mask(&self) -> u64 {
        mask(self.cell_size)
    }

    /// Whether runs stop at marked cells of this RAM.
    #[must_use]
    pub const fn halt_at_breaks(&self) -> bool {
        self.halt_at_breaks
    }

    /// Enables or disables stopping at breakpoints.
    pub const fn set_halt_at_breaks(&mut self, halt: bool) {
        self.halt_at_breaks = halt;
    }

    /// All cells in address order.
    #[must_use]
    pub fn locations(&self) -> &[RamLocation] {
        &self.cells
    }

    /// Cells changed by the most recent [`Self::set_data`] or [`Self::set_cell`].
    #[must_use]
    pub fn last_changes(&self) -> &[CellChange] {
        &self.last_changes
    }

    /// Forgets the change record.
    pub fn clear_last_changes(&mut self) {
        self.last_changes.clear();
    }

    fn index(&self, address: u64, count: usize) -> SimResult<usize> {
        let length = self.cells.len();
        usize::try_from(address)
            .ok()
            .filter(|start| start.checked_add(count).is_some_and(|end| end <= length))
            .ok_or_else(|| SimError::Address {
                address: address.into(),
                length,
            })
    }

    /// Cell at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `address` is outside `[0, len)`.
    pub fn location(&self, address: u64) -> SimResult<&RamLocation> {
        let index = self.index(address, 1)?;
        Ok(&self.cells[index])
    }

    /// Mutable cell metadata at `address`; contents go through
    /// [`Self::set_cell`] so masking is never bypassed.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `address` is outside `[0, len)`.
    pub fn location_mut(&mut self, address: u64) -> SimResult<&mut RamLocation> {
        let index = self.index(address, 1)?;
        Ok(&mut self.cells[index])
    }

    /// Contents of one cell.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `address` is outside `[0, len)`.
    pub fn cell(&self, address: u64) -> SimResult<i64> {
        self.location(address).map(RamLocation::value)
    }

    /// Overwrites one cell with the low `cell_size` bits of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `address` is outside `[0, len)`.
    pub fn set_cell(&mut self, address: u64, value: i64) -> SimResult<()> {
        let index = self.index(address, 1)?;
        self.last_changes.clear();
        self.write_cell(index, to_unsigned(value, self.cell_size));
        Ok(())
    }

    fn write_cell(&mut self, index: usize, bits: u64) {
        let cell = &mut self.cells[index];
        let previous = cell.value;
        cell.value = bits as i64;
        self.last_changes.push(CellChange {
            address: cell.address,
            previous,
            current: cell.value,
        });
    }

    /// Number of consecutive cells a `num_bits` access spans.
    #[must_use]
    pub const fn cells_spanned(&self, num_bits: u32) -> usize {
        num_bits.div_ceil(self.cell_size) as usize
    }

    /// Reads `num_bits` bits spanning `ceil(num_bits / cell_size)` cells from
    /// `address` upwards, most significant cell first, and sign-extends the
    /// low `num_bits` bits of the concatenation.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for `num_bits` outside `1..=64`
    /// and [`SimError::Address`] when the span leaves the RAM.
    pub fn get_data(&self, address: u64, num_bits: u32) -> SimResult<i64> {
        check_width(num_bits)?;
        let count = self.cells_spanned(num_bits);
        let start = self.index(address, count)?;
        let concatenated = self.cells[start..start + count]
            .iter()
            .fold(0_u128, |acc, cell| {
                (acc << self.cell_size) | u128::from(to_unsigned(cell.value, self.cell_size))
            });
        Ok(sign_extend(concatenated as u64, num_bits))
    }

    /// Writes `value` as `num_bits` bits across
    /// `ceil(num_bits / cell_size)` cells from `address` upwards, most
    /// significant cell first. Padding bits above `num_bits` in the first cell
    /// carry the sign.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for `num_bits` outside `1..=64`,
    /// [`SimError::Range`] when `value` does not fit `num_bits` bits and
    /// [`SimError::Address`] when the span leaves the RAM. Nothing is written
    /// on error.
    pub fn set_data(&mut self, address: u64, value: i64, num_bits: u32) -> SimResult<()> {
        check_width(num_bits)?;
        if !fits_in_bits(value.into(), num_bits) {
            return Err(SimError::range(value, num_bits));
        }
        let count = self.cells_spanned(num_bits);
        let start = self.index(address, count)?;

        let normalized = i128::from(sign_extend(to_unsigned(value, num_bits), num_bits)) as u128;
        let cell_size = self.cell_size;
        let cell_mask = u128::from(self.cell_mask());
        self.last_changes.clear();
        for offset in 0..count {
            let shift = cell_size as usize * (count - 1 - offset);
            let bits = (normalized >> shift) & cell_mask;
            self.write_cell(start + offset, bits as u64);
        }
        Ok(())
    }

    /// Changes the number of cells, keeping existing contents.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] when `length` exceeds the 32-bit
    /// address space.
    pub fn resize(&mut self, length: usize) -> SimResult<()> {
        if u32::try_from(length).is_err() {
            return Err(SimError::invalid(format!(
                "{length} cells exceed the addressable range"
            )));
        }
        self.cells.truncate(length);
        let mut address = self.cells.len() as u32;
        self.cells.resize_with(length, || {
            let cell = RamLocation {
                address,
                ..RamLocation::default()
            };
            address += 1;
            cell
        });
        self.last_changes.clear();
        Ok(())
    }

    /// Changes the cell size and re-masks every cell.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidArgument`] for sizes outside `1..=64`.
    pub fn set_cell_size(&mut self, cell_size: u32) -> SimResult<()> {
        check_width(cell_size)?;
        self.cell_size = cell_size;
        for cell in &mut self.cells {
            cell.value = to_unsigned(cell.value, cell_size) as i64;
        }
        Ok(())
    }

    /// Flips the breakpoint mark on a cell and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Address`] when `address` is outside `[0, len)`.
    pub fn toggle_breakpoint(&mut self, address: u64) -> SimResult<bool> {
        let cell = self.location_mut(address)?;
        cell.breakpoint = !cell.breakpoint;
        Ok(cell.breakpoint)
    }

    /// Zeroes every cell and drops comments and source lines. Breakpoints are
    /// removed only when `clear_breakpoints` is set.
    pub fn clear(&mut self, clear_breakpoints: bool) {
        for cell in &mut self.cells {
            cell.value = 0;
            cell.comment.clear();
            cell.source_line = None;
            if clear_breakpoints {
                cell.breakpoint = false;
            }
        }
        self.last_changes.clear();
    }

    /// Contents of every cell, for backup and restore.
    #[must_use]
    pub fn snapshot(&self) -> Vec<i64> {
        self.cells.iter().map(RamLocation::value).collect()
    }

    /// Restores contents captured with [`Self::snapshot`]; extra entries are
    /// ignored and missing ones leave cells untouched.
    pub fn restore(&mut self, values: &[i64]) {
        for (cell, value) in self.cells.iter_mut().zip(values) {
            cell.value = to_unsigned(*value, self.cell_size) as i64;
        }
        self.last_changes.clear();
    }

    pub(crate) fn reidentify(&self, id: ComponentId, owner: MachineId) -> Self {
        Self {
            id,
            owner,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CellChange, Ram};
    use crate::{ComponentId, ErrorKind, MachineId};

    fn ram(length: usize, cell_size: u32) -> Ram {
        Ram::new(
            ComponentId::new(1),
            MachineId::fresh(),
            "Main".into(),
            length,
            cell_size,
        )
        .expect("valid ram")
    }

    #[test]
    fn cells_are_masked_on_write() {
        let mut mem = ram(4, 8);
        mem.set_cell(0, -1).unwrap();
        assert_eq!(mem.cell(0).unwrap(), 0xFF);
        mem.set_cell(1, 0x1_23).unwrap();
        assert_eq!(mem.cell(1).unwrap(), 0x23);
        assert_eq!(mem.locations()[3].address, 3);
    }

    #[test]
    fn multi_cell_access_is_big_endian() {
        let mut mem = ram(4, 8);
        mem.set_data(1, 0x1234, 16).unwrap();
        assert_eq!(mem.cell(1).unwrap(), 0x12);
        assert_eq!(mem.cell(2).unwrap(), 0x34);
        assert_eq!(mem.get_data(1, 16).unwrap(), 0x1234);
        assert_eq!(mem.get_data(1, 8).unwrap(), 0x12);
    }

    #[test]
    fn odd_cell_sizes_sign_extend_from_num_bits() {
        let mut mem = ram(8, 5);
        assert_eq!(mem.cells_spanned(12), 3);
        mem.set_data(0, -1000, 12).unwrap();
        assert_eq!(mem.last_changes().len(), 3);
        assert_eq!(mem.get_data(0, 12).unwrap(), -1000);

        mem.set_data(0, 2047, 12).unwrap();
        assert_eq!(mem.get_data(0, 12).unwrap(), 2047);
        // The unsigned reading wraps to the signed pattern.
        mem.set_data(0, 4095, 12).unwrap();
        assert_eq!(mem.get_data(0, 12).unwrap(), -1);
    }

    #[test]
    fn full_width_values_survive_sixty_five_bit_spans() {
        let mut mem = ram(16, 5);
        mem.set_data(2, i64::MIN + 5, 64).unwrap();
        assert_eq!(mem.cells_spanned(64), 13);
        assert_eq!(mem.get_data(2, 64).unwrap(), i64::MIN + 5);
    }

    #[test]
    fn out_of_range_spans_fail_without_writing() {
        let mut mem = ram(4, 8);
        mem.set_cell(3, 7).unwrap();
        let err = mem.set_data(3, 0x0101, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Address);
        assert_eq!(mem.cell(3).unwrap(), 7);
        assert!(mem.get_data(4, 8).is_err());
        assert!(mem.get_data(u64::MAX, 8).is_err());
        assert_eq!(
            mem.set_data(0, 300, 8).unwrap_err().kind(),
            ErrorKind::Range
        );
    }

    #[test]
    fn last_changes_record_previous_contents() {
        let mut mem = ram(4, 8);
        mem.set_data(0, 0x0102, 16).unwrap();
        mem.set_data(0, 0x0304, 16).unwrap();
        assert_eq!(
            mem.last_changes(),
            &[
                CellChange {
                    address: 0,
                    previous: 0x01,
                    current: 0x03
                },
                CellChange {
                    address: 1,
                    previous: 0x02,
                    current: 0x04
                },
            ]
        );
        mem.clear_last_changes();
        assert!(mem.last_changes().is_empty());
    }

    #[test]
    fn shrinking_cell_size_remasks_contents() {
        let mut mem = ram(2, 8);
        mem.set_cell(0, 0xAB).unwrap();
        mem.set_cell_size(4).unwrap();
        assert_eq!(mem.cell(0).unwrap(), 0xB);
    }

    #[test]
    fn resize_keeps_contents_and_numbers_new_cells() {
        let mut mem = ram(2, 8);
        mem.set_cell(1, 9).unwrap();
        mem.resize(4).unwrap();
        assert_eq!(mem.cell(1).unwrap(), 9);
        assert_eq!(mem.location(3).unwrap().address, 3);
        mem.resize(1).unwrap();
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn breakpoints_toggle_and_survive_soft_clear() {
        let mut mem = ram(2, 8);
        assert!(mem.toggle_breakpoint(1).unwrap());
        mem.set_cell(1, 5).unwrap();
        mem.clear(false);
        assert_eq!(mem.cell(1).unwrap(), 0);
        assert!(mem.location(1).unwrap().breakpoint);
        mem.clear(true);
        assert!(!mem.location(1).unwrap().breakpoint);
    }

    #[test]
    fn snapshot_restore_round_trips_contents() {
        let mut mem = ram(3, 8);
        mem.set_data(0, 0x010203, 24).unwrap();
        let saved = mem.snapshot();
        mem.clear(true);
        mem.restore(&saved);
        assert_eq!(mem.get_data(0, 24).unwrap(), 0x010203);
    }
}
