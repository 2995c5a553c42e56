//! Per-packet and per-burst transmission status.

/// Status of one burst at the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BurstStatus {
    /// Waiting to be written.
    #[default]
    Unsent,
    /// Written, not yet acknowledged.
    Sent,
    /// Covered by an acknowledgement.
    Confirmed,
}

/// Status of one packet at the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketStatus {
    /// Has bursts waiting to be written.
    #[default]
    Unsent,
    /// Every burst written, awaiting `RXED`.
    Sent,
    /// Acknowledged by the receiver.
    Confirmed,
}

/// Status of every burst of one packet, indexed `0..=burst_count + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstTable {
    bursts: Vec<BurstStatus>,
    attempts: Vec<u32>,
}

impl BurstTable {
    /// Table for a packet framed into `burst_count` data bursts.
    #[must_use]
    pub fn new(burst_count: u16) -> Self {
        let len = usize::from(burst_count) + 2;
        Self {
            bursts: vec![BurstStatus::Unsent; len],
            attempts: vec![0; len],
        }
    }

    /// Bursts tracked, announce and terminal included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    /// Always false; a table holds at least the announce and terminal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }

    /// Index of the terminal burst.
    #[must_use]
    pub fn terminal_index(&self) -> u16 {
        // At most MAX_BURSTS_PER_PACKET + 2 entries.
        (self.bursts.len() - 1) as u16
    }

    /// Status of one burst.
    #[must_use]
    pub fn get(&self, index: u16) -> Option<BurstStatus> {
        self.bursts.get(usize::from(index)).copied()
    }

    /// Times the burst was written.
    #[must_use]
    pub fn attempts(&self, index: u16) -> u32 {
        self.attempts.get(usize::from(index)).copied().unwrap_or(0)
    }

    /// Lowest-numbered burst waiting to be written.
    #[must_use]
    pub fn next_unsent(&self) -> Option<u16> {
        self.bursts
            .iter()
            .position(|status| *status == BurstStatus::Unsent)
            .map(|index| index as u16)
    }

    /// Record a write; returns true when it was a retransmission.
    pub fn mark_sent(&mut self, index: u16) -> bool {
        let index = usize::from(index);
        if let Some(status) = self.bursts.get_mut(index) {
            *status = BurstStatus::Sent;
            self.attempts[index] += 1;
            return self.attempts[index] > 1;
        }
        false
    }

    /// Queue one burst for (re)transmission; false when out of range.
    pub fn mark_unsent(&mut self, index: u16) -> bool {
        match self.bursts.get_mut(usize::from(index)) {
            Some(status) => {
                *status = BurstStatus::Unsent;
                true
            }
            None => false,
        }
    }

    /// Queue every burst again.
    pub fn reset(&mut self) {
        self.bursts.fill(BurstStatus::Unsent);
    }

    /// Mark every burst acknowledged.
    pub fn confirm_all(&mut self) {
        self.bursts.fill(BurstStatus::Confirmed);
    }

    /// True when no burst waits to be written.
    #[must_use]
    pub fn all_sent(&self) -> bool {
        !self.bursts.contains(&BurstStatus::Unsent)
    }
}
