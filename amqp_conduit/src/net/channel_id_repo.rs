use crate::frame::{AmqpChannelId, CONN_DEFAULT_CHANNEL};

const INITIAL_BIT_MASK: u8 = 0b1000_0000;

/// Bitmap of channel ids in use, `1..=channel_max`.
pub(crate) struct ChannelIdRepository {
    channel_max: u16,
    /// Each bit represent two states: 1: occupied, 0: free.
    /// Real id is calculated by byte position in Vec + bit position in byte.
    id_state: Vec<u8>,
}

impl ChannelIdRepository {
    pub fn new(channel_max: u16) -> Self {
        let len = if channel_max == 0 {
            0
        } else {
            1 + (channel_max as usize - 1) / 8
        };
        Self {
            channel_max,
            id_state: vec![0; len],
        }
    }

    pub fn channel_max(&self) -> u16 {
        self.channel_max
    }

    fn is_free(&self, pos: usize, mask: u8) -> bool {
        (mask & self.id_state[pos]) == 0
    }

    fn set_occupied(&mut self, pos: usize, mask: u8) {
        self.id_state[pos] |= mask;
    }

    fn set_free(&mut self, pos: usize, mask: u8) {
        self.id_state[pos] &= !mask;
    }

    fn get_pos_mask(&self, id: AmqpChannelId) -> Option<(usize, u8)> {
        if id == CONN_DEFAULT_CHANNEL || id > self.channel_max {
            return None;
        }
        let pos = (id as usize - 1) / 8;
        let mask = INITIAL_BIT_MASK >> ((id - 1) % 8);
        Some((pos, mask))
    }

    /// Lowest free id, `None` if all `channel_max` ids are in use.
    pub fn allocate(&mut self) -> Option<AmqpChannelId> {
        for (pos, &state) in self.id_state.iter().enumerate() {
            if state == 0b1111_1111 {
                continue;
            }
            for i in 0..8u16 {
                let mask = INITIAL_BIT_MASK >> i;
                if (mask & state) == 0 {
                    let channel_id = pos as AmqpChannelId * 8 + i + 1;
                    // the last byte may have bits beyond channel_max
                    if channel_id > self.channel_max {
                        return None;
                    }
                    self.set_occupied(pos, mask);
                    return Some(channel_id);
                }
            }
        }
        None
    }

    /// true: OK, false: already released or out of range
    pub fn release(&mut self, id: AmqpChannelId) -> bool {
        match self.get_pos_mask(id) {
            Some((pos, mask)) if !self.is_free(pos, mask) => {
                self.set_free(pos, mask);
                true
            }
            _ => false,
        }
    }

    /// true: OK, false: already reserved or out of range
    pub fn reserve(&mut self, id: AmqpChannelId) -> bool {
        match self.get_pos_mask(id) {
            Some((pos, mask)) if self.is_free(pos, mask) => {
                self.set_occupied(pos, mask);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::ChannelIdRepository;

    #[test]
    fn test_id_allocate_and_release() {
        let channel_max = 2047;
        let mut id_repo = ChannelIdRepository::new(channel_max);

        let mut ids = HashSet::new();
        for _ in 0..channel_max {
            let id = id_repo.allocate().unwrap();
            assert!(ids.insert(id));
        }
        // exhausted
        assert_eq!(None, id_repo.allocate());

        for id in ids {
            assert!(id_repo.release(id));
        }
        // can allocate to max again
        for _ in 0..channel_max {
            assert!(id_repo.allocate().is_some());
        }
    }

    #[test]
    fn test_lowest_free_id_first() {
        let mut id_repo = ChannelIdRepository::new(20);
        for expected in 1..=10 {
            assert_eq!(Some(expected), id_repo.allocate());
        }
        assert!(id_repo.release(4));
        assert!(id_repo.release(9));
        assert_eq!(Some(4), id_repo.allocate());
        assert_eq!(Some(9), id_repo.allocate());
        assert_eq!(Some(11), id_repo.allocate());
    }

    #[test]
    fn test_limit_not_multiple_of_eight() {
        let mut id_repo = ChannelIdRepository::new(3);
        assert_eq!(Some(1), id_repo.allocate());
        assert_eq!(Some(2), id_repo.allocate());
        assert_eq!(Some(3), id_repo.allocate());
        assert_eq!(None, id_repo.allocate());
        assert!(!id_repo.reserve(4));
    }

    #[test]
    fn test_cannot_reserve_occupied_id() {
        let mut id_repo = ChannelIdRepository::new(16);
        assert!(id_repo.reserve(5));
        assert!(!id_repo.reserve(5));
        assert!(!id_repo.reserve(0));
        assert!(!id_repo.release(6));
        assert!(id_repo.release(5));
    }
}
