//! Directory state: the authoritative (domain, kind, id) -> url map, the
//! url-to-component side index, and the registered-publishers bootstrap
//! queue.
//!
//! Grounded on `ServiceDirectory.cpp`'s `handleRegister`, `handleUnregister`,
//! `purgeObsoletePublishers` and `updateProductLocations`. Pure data plus
//! logic, no networking — the networking glue lives in `server.rs` so this
//! module is unit-testable without a socket.

use gravity::protocol::{ChangeType, DirectoryReturnCode, ProductChange, RegistrationKind, ServiceDirectoryMap};
use std::collections::HashMap;

/// An update the directory owes its own published channels, queued up until
/// `RegisteredPublishers` itself has been registered and is ready to carry
/// traffic.
#[derive(Debug, Clone)]
pub enum PendingPublish {
    RegisteredPublishers { product_id: String, urls: Vec<String> },
    DomainDetails { domain: String, change: ProductChange },
}

/// Outcome of a registration: the wire return code, the change record to
/// publish, and any other data products purged because they shared the same
/// URL (see `purgeObsoletePublishers`).
pub struct RegisterOutcome {
    pub return_code: DirectoryReturnCode,
    pub change: ProductChange,
    pub purged: Vec<ProductChange>,
}

pub struct DirectoryState {
    own_domain: String,
    data: HashMap<String, HashMap<String, Vec<String>>>,
    services: HashMap<String, HashMap<String, String>>,
    url_to_component: HashMap<String, String>,
    publishers_channel_ready: bool,
    pending: Vec<PendingPublish>,
}

impl DirectoryState {
    pub fn new(own_domain: impl Into<String>) -> Self {
        Self {
            own_domain: own_domain.into(),
            data: HashMap::new(),
            services: HashMap::new(),
            url_to_component: HashMap::new(),
            publishers_channel_ready: false,
            pending: Vec::new(),
        }
    }

    pub fn own_domain(&self) -> &str {
        &self.own_domain
    }

    pub fn lookup_data(&self, domain: &str, id: &str) -> Vec<String> {
        self.data
            .get(domain)
            .and_then(|m| m.get(id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn lookup_service(&self, domain: &str, id: &str) -> Option<String> {
        self.services.get(domain).and_then(|m| m.get(id)).cloned()
    }

    /// Register `id` -> `url` under `domain`. Duplicate (id, url) pairs in a
    /// DATA list are a no-op insert that still reports `Success`; SERVICE
    /// registration unconditionally overwrites, logging a warning if it
    /// replaces a different URL. Obsolete-publisher purging only ever
    /// touches this directory's own domain, regardless of which domain is
    /// being registered into (a registration into a synced-in peer domain
    /// cannot invalidate that peer's own bookkeeping).
    pub fn register(
        &mut self,
        domain: &str,
        kind: RegistrationKind,
        id: &str,
        url: &str,
        component_id: &str,
    ) -> RegisterOutcome {
        self.url_to_component.insert(url.to_string(), component_id.to_string());

        let mut purged = Vec::new();
        match kind {
            RegistrationKind::Data => {
                let list = self
                    .data
                    .entry(domain.to_string())
                    .or_default()
                    .entry(id.to_string())
                    .or_default();
                if !list.iter().any(|u| u == url) {
                    list.push(url.to_string());
                }
                if domain == self.own_domain {
                    purged = self.purge_obsolete_publishers(id, url, component_id);
                }
            }
            RegistrationKind::Service => {
                let map = self.services.entry(domain.to_string()).or_default();
                if let Some(existing) = map.get(id) {
                    if existing != url {
                        tracing::warn!(%id, %existing, new = %url, "overwriting service registration");
                    }
                }
                map.insert(id.to_string(), url.to_string());
            }
        }

        let change = ProductChange {
            product_id: id.to_string(),
            url: url.to_string(),
            component_id: component_id.to_string(),
            change_type: ChangeType::Add,
            registration_type: kind,
        };
        RegisterOutcome {
            return_code: DirectoryReturnCode::Success,
            change,
            purged,
        }
    }

    /// A URL can only ever represent one data product at a time. Walk every
    /// other DATA id in the directory's own domain and remove this URL from
    /// it if present.
    fn purge_obsolete_publishers(
        &mut self,
        registering_id: &str,
        url: &str,
        new_owner: &str,
    ) -> Vec<ProductChange> {
        let mut purged = Vec::new();
        let mut emptied = Vec::new();
        if let Some(domain_map) = self.data.get_mut(&self.own_domain) {
            for (other_id, urls) in domain_map.iter_mut() {
                if other_id == registering_id {
                    continue;
                }
                if let Some(pos) = urls.iter().position(|u| u == url) {
                    urls.remove(pos);
                    purged.push(ProductChange {
                        product_id: other_id.clone(),
                        url: url.to_string(),
                        component_id: new_owner.to_string(),
                        change_type: ChangeType::Remove,
                        registration_type: RegistrationKind::Data,
                    });
                    if urls.is_empty() {
                        emptied.push(other_id.clone());
                    }
                }
            }
            for id in emptied {
                domain_map.remove(&id);
            }
        }
        purged
    }

    pub fn unregister(
        &mut self,
        domain: &str,
        kind: RegistrationKind,
        id: &str,
        url: &str,
    ) -> (DirectoryReturnCode, Option<ProductChange>) {
        match kind {
            RegistrationKind::Data => {
                let Some(domain_map) = self.data.get_mut(domain) else {
                    return (DirectoryReturnCode::NotRegistered, None);
                };
                let Some(urls) = domain_map.get_mut(id) else {
                    return (DirectoryReturnCode::NotRegistered, None);
                };
                let Some(pos) = urls.iter().position(|u| u == url) else {
                    return (DirectoryReturnCode::NotRegistered, None);
                };
                urls.remove(pos);
                if urls.is_empty() {
                    domain_map.remove(id);
                }
                let component_id = self.url_to_component.remove(url).unwrap_or_default();
                let change = ProductChange {
                    product_id: id.to_string(),
                    url: url.to_string(),
                    component_id,
                    change_type: ChangeType::Remove,
                    registration_type: RegistrationKind::Data,
                };
                (DirectoryReturnCode::Success, Some(change))
            }
            RegistrationKind::Service => {
                let Some(map) = self.services.get_mut(domain) else {
                    return (DirectoryReturnCode::NotRegistered, None);
                };
                match map.get(id) {
                    Some(existing) if existing == url => {
                        map.remove(id);
                        let component_id = self.url_to_component.remove(url).unwrap_or_default();
                        let change = ProductChange {
                            product_id: id.to_string(),
                            url: url.to_string(),
                            component_id,
                            change_type: ChangeType::Remove,
                            registration_type: RegistrationKind::Service,
                        };
                        (DirectoryReturnCode::Success, Some(change))
                    }
                    _ => (DirectoryReturnCode::NotRegistered, None),
                }
            }
        }
    }

    pub fn domain_snapshot(&self, domain: &str) -> ServiceDirectoryMap {
        ServiceDirectoryMap {
            domain: domain.to_string(),
            service_providers: self
                .services
                .get(domain)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            data_providers: self
                .data
                .get(domain)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            change: None,
        }
    }

    pub fn all_domains_snapshot(&self) -> Vec<ServiceDirectoryMap> {
        let mut domains: Vec<&str> = self
            .data
            .keys()
            .map(String::as_str)
            .chain(self.services.keys().map(String::as_str))
            .collect();
        domains.sort_unstable();
        domains.dedup();
        domains.into_iter().map(|d| self.domain_snapshot(d)).collect()
    }

    /// Merge a peer directory's domain snapshot in under its own domain key.
    /// Never writes into `own_domain` — cross-domain sync must not leak
    /// foreign entries into the local authoritative map.
    pub fn merge_foreign_domain(&mut self, snapshot: ServiceDirectoryMap) {
        if snapshot.domain == self.own_domain {
            tracing::warn!(domain = %snapshot.domain, "ignoring sync of own domain from a peer");
            return;
        }
        let data_map: HashMap<String, Vec<String>> = snapshot.data_providers.into_iter().collect();
        let service_map: HashMap<String, String> = snapshot.service_providers.into_iter().collect();
        for url in data_map.values().flatten().chain(service_map.values()) {
            self.url_to_component
                .entry(url.clone())
                .or_insert_with(|| format!("peer:{}", snapshot.domain));
        }
        self.data.insert(snapshot.domain.clone(), data_map);
        self.services.insert(snapshot.domain, service_map);
    }

    pub fn remove_foreign_domain(&mut self, domain: &str) {
        if domain == self.own_domain {
            return;
        }
        if let Some(removed) = self.data.remove(domain) {
            for url in removed.into_values().flatten() {
                self.url_to_component.remove(&url);
            }
        }
        if let Some(removed) = self.services.remove(domain) {
            for url in removed.into_values() {
                self.url_to_component.remove(&url);
            }
        }
    }

    pub fn publishers_channel_ready(&self) -> bool {
        self.publishers_channel_ready
    }

    pub fn mark_publishers_channel_ready(&mut self) {
        self.publishers_channel_ready = true;
    }

    pub fn queue_update(&mut self, update: PendingPublish) {
        self.pending.push(update);
    }

    pub fn drain_pending(&mut self) -> Vec<PendingPublish> {
        std::mem::take(&mut self.pending)
    }
}
