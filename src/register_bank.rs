/// Modbus register bank backing the simulated device
///
/// This module provides thread-safe storage for the four Modbus address
/// spaces: coils, discrete inputs, holding registers and input registers.
/// The spaces are independent; the same address in two spaces names two
/// different cells. Unset cells read as `false` / `0`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Modbus register bank for storing coils, discrete inputs, holding registers, and input registers
///
/// Clones share the same storage. A lock poisoned by a panicking writer is
/// recovered rather than propagated, so every accessor is infallible.
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    /// Coils (read/write) - 1 bit each
    coils: Arc<RwLock<HashMap<u16, bool>>>,
    /// Discrete inputs (read-only on the wire) - 1 bit each
    discrete_inputs: Arc<RwLock<HashMap<u16, bool>>>,
    /// Holding registers (read/write) - 16 bits each
    holding_registers: Arc<RwLock<HashMap<u16, u16>>>,
    /// Input registers (read-only on the wire) - 16 bits each
    input_registers: Arc<RwLock<HashMap<u16, u16>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn collect<V: Copy + Default>(table: &HashMap<u16, V>, address: u16, quantity: u16) -> Vec<V> {
    (0..quantity)
        .map(|i| table.get(&address.wrapping_add(i)).copied().unwrap_or_default())
        .collect()
}

fn store<V: Copy>(table: &mut HashMap<u16, V>, address: u16, values: &[V]) {
    for (i, &value) in values.iter().enumerate() {
        table.insert(address.wrapping_add(i as u16), value);
    }
}

impl RegisterBank {
    /// Create a new register bank with empty data
    pub fn new() -> Self {
        Self::default()
    }

    /// Read coils starting at address (function code 0x01)
    pub fn read_coils(&self, address: u16, quantity: u16) -> Vec<bool> {
        collect(&read(&self.coils), address, quantity)
    }

    /// Write coils starting at address (function codes 0x05 and 0x0F)
    pub fn write_coils(&self, address: u16, values: &[bool]) {
        store(&mut write(&self.coils), address, values);
    }

    /// Read discrete inputs starting at address (function code 0x02)
    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> Vec<bool> {
        collect(&read(&self.discrete_inputs), address, quantity)
    }

    /// Set discrete input values (for simulation/testing)
    pub fn set_discrete_inputs(&self, address: u16, values: &[bool]) {
        store(&mut write(&self.discrete_inputs), address, values);
    }

    /// Read holding registers starting at address (function code 0x03)
    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> Vec<u16> {
        collect(&read(&self.holding_registers), address, quantity)
    }

    /// Write holding registers starting at address (function codes 0x06 and 0x10)
    pub fn write_holding_registers(&self, address: u16, values: &[u16]) {
        store(&mut write(&self.holding_registers), address, values);
    }

    /// Apply AND/OR masks to one holding register (function code 0x16)
    ///
    /// Stores `(current & and_mask) | (or_mask & !and_mask)` and returns
    /// the new value.
    pub fn mask_write_holding_register(&self, address: u16, and_mask: u16, or_mask: u16) -> u16 {
        let mut registers = write(&self.holding_registers);
        let current = registers.get(&address).copied().unwrap_or(0);
        let value = (current & and_mask) | (or_mask & !and_mask);
        registers.insert(address, value);
        value
    }

    /// Write then read holding registers under one lock (function code 0x17)
    ///
    /// The read observes the state after the write, including overlapping cells.
    pub fn write_read_holding_registers(
        &self,
        write_address: u16,
        values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> Vec<u16> {
        let mut registers = write(&self.holding_registers);
        store(&mut registers, write_address, values);
        collect(&registers, read_address, read_quantity)
    }

    /// Read input registers starting at address (function code 0x04)
    pub fn read_input_registers(&self, address: u16, quantity: u16) -> Vec<u16> {
        collect(&read(&self.input_registers), address, quantity)
    }

    /// Set input register values (for simulation/testing)
    pub fn set_input_registers(&self, address: u16, values: &[u16]) {
        store(&mut write(&self.input_registers), address, values);
    }

    /// Get register bank statistics
    pub fn get_stats(&self) -> RegisterBankStats {
        RegisterBankStats {
            coils_count: read(&self.coils).len(),
            discrete_inputs_count: read(&self.discrete_inputs).len(),
            holding_registers_count: read(&self.holding_registers).len(),
            input_registers_count: read(&self.input_registers).len(),
        }
    }
}

/// Register bank statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBankStats {
    pub coils_count: usize,
    pub discrete_inputs_count: usize,
    pub holding_registers_count: usize,
    pub input_registers_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coil_operations() {
        let bank = RegisterBank::new();

        bank.write_coils(10, &[true]);
        assert_eq!(bank.read_coils(10, 1), vec![true]);

        bank.write_coils(20, &[true, false, true]);
        assert_eq!(bank.read_coils(20, 3), vec![true, false, true]);
        assert_eq!(bank.read_coils(23, 2), vec![false, false]);
    }

    #[test]
    fn test_register_operations() {
        let bank = RegisterBank::new();

        bank.write_holding_registers(5, &[42]);
        assert_eq!(bank.read_holding_registers(5, 1), vec![42]);

        bank.write_holding_registers(100, &[100, 200, 300]);
        assert_eq!(bank.read_holding_registers(100, 3), vec![100, 200, 300]);
    }

    #[test]
    fn test_address_spaces_are_independent() {
        let bank = RegisterBank::new();
        bank.write_holding_registers(7, &[0xBEEF]);
        bank.set_input_registers(7, &[0x1234]);
        bank.write_coils(7, &[true]);

        assert_eq!(bank.read_holding_registers(7, 1), vec![0xBEEF]);
        assert_eq!(bank.read_input_registers(7, 1), vec![0x1234]);
        assert_eq!(bank.read_discrete_inputs(7, 1), vec![false]);
        assert_eq!(bank.read_coils(7, 1), vec![true]);
    }

    #[test]
    fn test_mask_write() {
        let bank = RegisterBank::new();
        bank.write_holding_registers(4, &[0x12]);
        let value = bank.mask_write_holding_register(4, 0xF2, 0x25);
        assert_eq!(value, 0x17);
        assert_eq!(bank.read_holding_registers(4, 1), vec![0x17]);
    }

    #[test]
    fn test_write_read_overlap() {
        let bank = RegisterBank::new();
        bank.write_holding_registers(0, &[1, 2, 3, 4, 5]);
        let read = bank.write_read_holding_registers(2, &[30, 40], 1, 4);
        assert_eq!(read, vec![2, 30, 40, 5]);
    }

    #[test]
    fn test_stats_and_shared_clones() {
        let bank = RegisterBank::new();
        let shared = bank.clone();
        shared.write_holding_registers(0, &[1, 2]);
        shared.set_discrete_inputs(0, &[true]);

        let stats = bank.get_stats();
        assert_eq!(stats.holding_registers_count, 2);
        assert_eq!(stats.discrete_inputs_count, 1);
        assert_eq!(stats.coils_count, 0);
    }
}
