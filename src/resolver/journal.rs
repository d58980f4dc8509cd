// =============================================================================
// CROSSFILL - Swap Journal
// =============================================================================
//
// Local snapshot of each swap's last known state, for operators and for
// resuming after a restart. The chains stay authoritative; `status` can
// always rebuild a record from events alone.
//
// Trees:
//   swaps   order_hash -> SwapRecord (bincode)
//
// =============================================================================

use sled::{Db, Tree};
use std::path::Path;

use super::SwapRecord;
use crate::order::OrderHash;

pub struct SwapJournal {
    db: Db,
    swaps: Tree,
}

impl SwapJournal {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open journal: {}", e))?;
        Self::from_db(db)
    }

    pub fn temporary() -> Result<Self, String> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| format!("Failed to open journal: {}", e))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, String> {
        let swaps = db
            .open_tree("swaps")
            .map_err(|e| format!("Failed to open swaps tree: {}", e))?;
        Ok(SwapJournal { db, swaps })
    }

    /// Insert or replace the snapshot for `record.order_hash`
    pub fn record(&self, record: &SwapRecord) -> Result<(), String> {
        let data = bincode::serialize(record).map_err(|e| format!("Serialize error: {}", e))?;
        self.swaps
            .insert(record.order_hash.0, data)
            .map_err(|e| format!("Insert error: {}", e))?;
        Ok(())
    }

    pub fn get(&self, order_hash: &OrderHash) -> Result<Option<SwapRecord>, String> {
        match self.swaps.get(order_hash.0).map_err(|e| format!("Read error: {}", e))? {
            Some(data) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| format!("Deserialize error: {}", e)),
            None => Ok(None),
        }
    }

    /// Swaps not yet completed, cancelled, failed or aborted
    pub fn open_swaps(&self) -> Result<Vec<SwapRecord>, String> {
        Ok(self.list()?.into_iter().filter(|r| !r.state.is_terminal()).collect())
    }

    /// All snapshots, most recently updated first
    pub fn list(&self) -> Result<Vec<SwapRecord>, String> {
        let mut out = Vec::new();
        for item in self.swaps.iter() {
            let (_, data) = item.map_err(|e| format!("Read error: {}", e))?;
            let record: SwapRecord =
                bincode::deserialize(&data).map_err(|e| format!("Deserialize error: {}", e))?;
            out.push(record);
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| format!("Flush error: {}", e))?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SwapState;

    #[test]
    fn test_record_and_list() {
        let journal = SwapJournal::temporary().unwrap();
        let mut a = SwapRecord::new(OrderHash([1; 32]));
        a.updated_at = 10;
        let mut b = SwapRecord::new(OrderHash([2; 32]));
        b.state = SwapState::Completed;
        b.updated_at = 20;
        journal.record(&a).unwrap();
        journal.record(&b).unwrap();

        assert_eq!(journal.get(&OrderHash([1; 32])).unwrap(), Some(a.clone()));
        assert!(journal.get(&OrderHash([3; 32])).unwrap().is_none());

        let listed = journal.list().unwrap();
        assert_eq!(listed[0].order_hash, OrderHash([2; 32]));
        assert_eq!(journal.open_swaps().unwrap(), vec![a]);
    }

    #[test]
    fn test_record_replaces_snapshot() {
        let journal = SwapJournal::temporary().unwrap();
        let mut record = SwapRecord::new(OrderHash([1; 32]));
        journal.record(&record).unwrap();
        record.state = SwapState::SrcDeployed;
        journal.record(&record).unwrap();

        assert_eq!(journal.list().unwrap().len(), 1);
        assert_eq!(journal.get(&record.order_hash).unwrap().unwrap().state, SwapState::SrcDeployed);
    }
}
