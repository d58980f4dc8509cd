// =============================================================================
// CROSSFILL - Order Registry
// =============================================================================
//
// Where makers post signed orders and resolvers pick them up.
// Status is advisory bookkeeping; the chains are the source of truth.
//
// Trees:
//   orders           order_hash -> StoredOrder (bincode)
//   orders_by_maker  maker ++ created_at ++ order_hash -> ()
//   meta             counters
//
// =============================================================================

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::fmt;
use std::path::Path;

use super::{Order, OrderHash, OrderSignature};
use crate::address::Address;

/// Default page size for listings
pub const DEFAULT_PAGE_LIMIT: usize = 50;

const META_ORDER_COUNT: &[u8] = b"order_count";

// =============================================================================
// Types
// =============================================================================

/// Advisory lifecycle status of a posted order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Claimed,
    Refunded,
    Expired,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Claimed => write!(f, "claimed"),
            OrderStatus::Refunded => write!(f, "refunded"),
            OrderStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "claimed" => Ok(OrderStatus::Claimed),
            "refunded" => Ok(OrderStatus::Refunded),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Order as kept by the registry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredOrder {
    pub order_hash: OrderHash,
    pub order: Order,
    pub signature: Option<OrderSignature>,
    pub status: OrderStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Listing filter
#[derive(Clone, Debug)]
pub struct OrderFilter {
    pub maker: Option<Address>,
    pub status: Option<OrderStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for OrderFilter {
    fn default() -> Self {
        OrderFilter { maker: None, status: None, limit: DEFAULT_PAGE_LIMIT, offset: 0 }
    }
}

/// One page of a listing
#[derive(Clone, Debug)]
pub struct OrderPage {
    pub orders: Vec<StoredOrder>,
    pub total: usize,
    pub has_more: bool,
}

// =============================================================================
// Registry Trait
// =============================================================================

/// Order store consumed by the resolver
pub trait OrderRegistry: Send + Sync {
    /// Validate and store an order; returns its hash. Re-posting the same
    /// order returns the existing hash unchanged.
    fn create_order(&self, order: Order, signature: Option<OrderSignature>) -> Result<OrderHash, String>;

    fn get_order(&self, id: &OrderHash) -> Result<Option<StoredOrder>, String>;

    /// Newest first
    fn list_orders(&self, filter: &OrderFilter) -> Result<OrderPage, String>;

    fn update_status(&self, id: &OrderHash, status: OrderStatus) -> Result<(), String>;
}

// =============================================================================
// Sled Registry
// =============================================================================

pub struct SledOrderRegistry {
    db: Db,
    orders: Tree,
    orders_by_maker: Tree,
    meta: Tree,
}

impl SledOrderRegistry {
    /// Open or create the registry at a path
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
        Self::from_db(db)
    }

    /// Throwaway registry (tests, demo)
    pub fn temporary() -> Result<Self, String> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| format!("Failed to open database: {}", e))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, String> {
        let orders = db
            .open_tree("orders")
            .map_err(|e| format!("Failed to open orders tree: {}", e))?;
        let orders_by_maker = db
            .open_tree("orders_by_maker")
            .map_err(|e| format!("Failed to open orders_by_maker tree: {}", e))?;
        let meta = db
            .open_tree("meta")
            .map_err(|e| format!("Failed to open meta tree: {}", e))?;
        Ok(SledOrderRegistry { db, orders, orders_by_maker, meta })
    }

    /// Number of stored orders
    pub fn order_count(&self) -> u64 {
        self.meta
            .get(META_ORDER_COUNT)
            .ok()
            .flatten()
            .and_then(|v| <[u8; 8]>::try_from(v.as_ref()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0)
    }

    pub fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| format!("Flush error: {}", e))?;
        Ok(())
    }

    fn maker_key(maker: &Address, created_at: u64, id: &OrderHash) -> Vec<u8> {
        let mut key = Self::maker_prefix(maker);
        key.extend_from_slice(&created_at.to_be_bytes());
        key.extend_from_slice(&id.0);
        key
    }

    fn maker_prefix(maker: &Address) -> Vec<u8> {
        let bytes = maker.as_bytes();
        let mut key = Vec::with_capacity(1 + bytes.len() + 40);
        key.push(bytes.len() as u8);
        key.extend_from_slice(bytes);
        key
    }

    fn put(&self, stored: &StoredOrder) -> Result<(), String> {
        let data = bincode::serialize(stored).map_err(|e| format!("Serialize error: {}", e))?;
        self.orders
            .insert(stored.order_hash.0, data)
            .map_err(|e| format!("Insert error: {}", e))?;
        Ok(())
    }

    fn decode(data: &[u8]) -> Result<StoredOrder, String> {
        bincode::deserialize(data).map_err(|e| format!("Deserialize error: {}", e))
    }
}

impl OrderRegistry for SledOrderRegistry {
    fn create_order(&self, order: Order, signature: Option<OrderSignature>) -> Result<OrderHash, String> {
        order.validate().map_err(|e| e.to_string())?;
        if let Some(sig) = &signature {
            sig.verify(&order).map_err(|e| e.to_string())?;
        }

        let id = order.order_hash();
        if self.orders.contains_key(id.0).map_err(|e| format!("Read error: {}", e))? {
            return Ok(id);
        }

        let now = crate::unix_now();
        let stored = StoredOrder {
            order_hash: id,
            order,
            signature,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.put(&stored)?;
        self.orders_by_maker
            .insert(Self::maker_key(&stored.order.maker, now, &id), &[] as &[u8])
            .map_err(|e| format!("Maker index error: {}", e))?;

        let count = self.order_count() + 1;
        self.meta
            .insert(META_ORDER_COUNT, count.to_be_bytes().to_vec())
            .map_err(|e| format!("Meta error: {}", e))?;

        log::info!("Order {} stored (maker {})", id.short(), stored.order.maker.short());
        Ok(id)
    }

    fn get_order(&self, id: &OrderHash) -> Result<Option<StoredOrder>, String> {
        match self.orders.get(id.0).map_err(|e| format!("Read error: {}", e))? {
            Some(data) => Self::decode(&data).map(Some),
            None => Ok(None),
        }
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<OrderPage, String> {
        let mut all: Vec<StoredOrder> = match &filter.maker {
            Some(maker) => {
                let mut out = Vec::new();
                for item in self.orders_by_maker.scan_prefix(Self::maker_prefix(maker)).rev() {
                    let (key, _) = item.map_err(|e| format!("Read error: {}", e))?;
                    let id_bytes: [u8; 32] = key[key.len() - 32..]
                        .try_into()
                        .map_err(|_| "Corrupt maker index key".to_string())?;
                    if let Some(stored) = self.get_order(&OrderHash(id_bytes))? {
                        out.push(stored);
                    }
                }
                out
            }
            None => {
                let mut out = Vec::new();
                for item in self.orders.iter() {
                    let (_, data) = item.map_err(|e| format!("Read error: {}", e))?;
                    out.push(Self::decode(&data)?);
                }
                out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                out
            }
        };

        if let Some(status) = filter.status {
            all.retain(|o| o.status == status);
        }

        let total = all.len();
        let orders: Vec<StoredOrder> = all.into_iter().skip(filter.offset).take(filter.limit).collect();
        let has_more = filter.offset + orders.len() < total;

        Ok(OrderPage { orders, total, has_more })
    }

    fn update_status(&self, id: &OrderHash, status: OrderStatus) -> Result<(), String> {
        let mut stored = self
            .get_order(id)?
            .ok_or_else(|| format!("Order {} not found", id))?;
        stored.status = status;
        stored.updated_at = crate::unix_now();
        self.put(&stored)?;
        log::debug!("Order {} -> {}", id.short(), status);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::sample_order;

    fn order_with_nonce(nonce: u64) -> Order {
        let mut o = sample_order();
        o.nonce = nonce;
        o
    }

    #[test]
    fn test_create_and_get() {
        let reg = SledOrderRegistry::temporary().unwrap();
        let order = sample_order();
        let id = reg.create_order(order.clone(), None).unwrap();
        assert_eq!(id, order.order_hash());

        let stored = reg.get_order(&id).unwrap().unwrap();
        assert_eq!(stored.order, order);
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(reg.order_count(), 1);
    }

    #[test]
    fn test_create_is_idempotent() {
        let reg = SledOrderRegistry::temporary().unwrap();
        let a = reg.create_order(sample_order(), None).unwrap();
        let b = reg.create_order(sample_order(), None).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.order_count(), 1);
    }

    #[test]
    fn test_create_rejects_invalid() {
        let reg = SledOrderRegistry::temporary().unwrap();
        let mut o = sample_order();
        o.allow_partial_fills = true;
        assert!(reg.create_order(o, None).is_err());
        assert_eq!(reg.order_count(), 0);
    }

    #[test]
    fn test_list_with_filters_and_paging() {
        let reg = SledOrderRegistry::temporary().unwrap();
        for nonce in 0..5 {
            reg.create_order(order_with_nonce(nonce), None).unwrap();
        }
        let mut other = order_with_nonce(99);
        other.maker = Address::Evm([0x99; 20]);
        let other_id = reg.create_order(other, None).unwrap();

        let page = reg
            .list_orders(&OrderFilter { limit: 2, ..Default::default() })
            .unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.orders.len(), 2);
        assert!(page.has_more);

        let page = reg
            .list_orders(&OrderFilter {
                maker: Some(Address::Evm([0x11; 20])),
                offset: 3,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.orders.len(), 2);
        assert!(!page.has_more);

        reg.update_status(&other_id, OrderStatus::Claimed).unwrap();
        let page = reg
            .list_orders(&OrderFilter { status: Some(OrderStatus::Claimed), ..Default::default() })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.orders[0].order_hash, other_id);
    }

    #[test]
    fn test_update_missing_order() {
        let reg = SledOrderRegistry::temporary().unwrap();
        assert!(reg.update_status(&OrderHash([1; 32]), OrderStatus::Expired).is_err());
    }
}
