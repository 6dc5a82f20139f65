//! Push-driven reloads.
//!
//! A rowset server announces committed saves on an external channel as
//! text messages of the form `"<rowset_name>[:<filter>] <update_id> ..."`.
//! [`PushRouter`] parses them and reloads every bound engine of that rowset
//! with diff-merge enabled, passing the update ids along so each engine can
//! recognize echoes of its own saves.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use horizon_grid::{ReloadDecision, ReloadOptions};
use horizon_grid_core::logging::targets;
use parking_lot::Mutex;

use crate::driver::RowsetDriver;

/// A parsed push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub rowset_name: String,
    /// Filter token of the rows that changed. `None` concerns every filter.
    pub filter: Option<String>,
    pub update_ids: Vec<String>,
}

/// A push message without a rowset name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyPushMessage;

impl std::fmt::Display for EmptyPushMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("push message names no rowset")
    }
}

impl std::error::Error for EmptyPushMessage {}

impl FromStr for PushMessage {
    type Err = EmptyPushMessage;

    fn from_str(msg: &str) -> Result<Self, Self::Err> {
        let mut words = msg.split_whitespace();
        let head = words.next().ok_or(EmptyPushMessage)?;
        let (name, filter) = match head.split_once(':') {
            Some((name, filter)) => (name, Some(filter.to_string()).filter(|f| !f.is_empty())),
            None => (head, None),
        };
        if name.is_empty() {
            return Err(EmptyPushMessage);
        }
        Ok(Self {
            rowset_name: name.to_string(),
            filter,
            update_ids: words.map(str::to_string).collect(),
        })
    }
}

impl PushMessage {
    fn reload_options(&self) -> ReloadOptions {
        ReloadOptions {
            allow_diff_merge: true,
            update_ids: Some(self.update_ids.clone()),
            if_filter: self.filter.clone(),
        }
    }
}

/// Routes push messages to the drivers bound to each rowset name.
#[derive(Default)]
pub struct PushRouter {
    drivers: Mutex<HashMap<String, Vec<Arc<RowsetDriver>>>>,
}

impl PushRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages for the driver's rowset name to it. Drivers of
    /// unnamed rowsets cannot receive pushes and are refused.
    pub fn bind(&self, driver: Arc<RowsetDriver>) -> bool {
        let Some(name) = driver.rowset_name() else {
            tracing::warn!(target: targets::PUSH, "driver of an unnamed rowset not bound");
            return false;
        };
        self.drivers.lock().entry(name).or_default().push(driver);
        true
    }

    pub fn unbind(&self, driver: &Arc<RowsetDriver>) {
        let mut drivers = self.drivers.lock();
        for list in drivers.values_mut() {
            list.retain(|d| !Arc::ptr_eq(d, driver));
        }
        drivers.retain(|_, list| !list.is_empty());
    }

    pub fn bound_count(&self, rowset_name: &str) -> usize {
        self.drivers.lock().get(rowset_name).map_or(0, Vec::len)
    }

    /// Handle one push message. Returns the number of engines that
    /// fetched a new snapshot.
    pub async fn dispatch(&self, msg: &str) -> usize {
        let msg = match msg.parse::<PushMessage>() {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(target: targets::PUSH, %err, "push message ignored");
                return 0;
            }
        };
        let drivers = self
            .drivers
            .lock()
            .get(&msg.rowset_name)
            .cloned()
            .unwrap_or_default();
        tracing::debug!(
            target: targets::PUSH,
            rowset = %msg.rowset_name,
            ids = msg.update_ids.len(),
            engines = drivers.len(),
            "push received"
        );
        let mut fetched = 0;
        for driver in drivers {
            if let ReloadDecision::Fetch(_) = driver.reload(msg.reload_options()).await {
                fetched += 1;
            }
        }
        fetched
    }
}

impl std::fmt::Debug for PushRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let drivers = self.drivers.lock();
        f.debug_map()
            .entries(drivers.iter().map(|(name, list)| (name, list.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_push_message() {
        let msg: PushMessage = "items:[1,2] k3x9 a00b".parse().unwrap();
        assert_eq!(msg.rowset_name, "items");
        assert_eq!(msg.filter.as_deref(), Some("[1,2]"));
        assert_eq!(msg.update_ids, ["k3x9", "a00b"]);

        let msg: PushMessage = "orders".parse().unwrap();
        assert_eq!(msg.filter, None);
        assert!(msg.update_ids.is_empty());

        let msg: PushMessage = r#"lines:[{"order_id":1}] zz"#.parse().unwrap();
        assert_eq!(msg.filter.as_deref(), Some(r#"[{"order_id":1}]"#));

        assert_eq!("   ".parse::<PushMessage>(), Err(EmptyPushMessage));
        assert_eq!(":[1] x".parse::<PushMessage>(), Err(EmptyPushMessage));
    }

    #[test]
    fn test_reload_options_allow_diff_merge() {
        let msg: PushMessage = "items u1".parse().unwrap();
        let opts = msg.reload_options();
        assert!(opts.allow_diff_merge);
        assert_eq!(opts.update_ids, Some(vec!["u1".to_string()]));
        assert_eq!(opts.if_filter, None);
    }
}
