//! Maritime safety information sources
//!
//! Every source is a [`CatalogSource`]: a descriptor, the JSON field its
//! records live under, and a function building the remote requests. The
//! per-source behavior table:
//!
//! | key | bundle | needs-processed | post-process | image cache |
//! |---|---|---|---|---|
//! | `asam` | `asam.json` | every merge | no | no |
//! | `modu` | `modu.json` | every merge | no | no |
//! | `navigational_warning` | none | every merge | no | no |
//! | `light` | `lights.json` | bootstrap only | yes | yes |
//! | `radio_beacon` | `radioBeacons.json` | bootstrap only | no | yes |
//! | `dgps_station` | `dgps.json` | bootstrap only | no | yes |
//! | `port` | `ports.json` | bootstrap only | yes | no |
//! | `notice_to_mariners` | none | never | no | no |
//! | `electronic_publication` | none | never | no | no |
//!
//! The needs-processed column is historical and deliberately not unified.

pub mod records;

pub use records::{
    Asam, DgpsStation, ElectronicPublication, Light, Modu, NavigationalWarning, NoticeToMariners,
    Port, RadioBeacon,
};

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

use crate::coordinator::{Coordinator, SourceCoordinator, SyncEnvironment};
use crate::error::{Error, Result};
use crate::registry::CoordinatorRegistry;
use crate::source::{
    BundleSpec, DataSource, DataSourceDescriptor, FetchContext, NeedsProcessedPolicy, SourceKey,
    SyncRecord,
};
use crate::traits::RemoteRequest;

pub const ASAM: &str = "asam";
pub const MODU: &str = "modu";
pub const NAVIGATIONAL_WARNING: &str = "navigational_warning";
pub const LIGHT: &str = "light";
pub const RADIO_BEACON: &str = "radio_beacon";
pub const DGPS_STATION: &str = "dgps_station";
pub const PORT: &str = "port";
pub const NOTICE_TO_MARINERS: &str = "notice_to_mariners";
pub const ELECTRONIC_PUBLICATION: &str = "electronic_publication";

/// Every catalog source key
pub const ALL_SOURCES: [&str; 9] = [
    ASAM,
    MODU,
    NAVIGATIONAL_WARNING,
    LIGHT,
    RADIO_BEACON,
    DGPS_STATION,
    PORT,
    NOTICE_TO_MARINERS,
    ELECTRONIC_PUBLICATION,
];

/// Publication volumes of the list of lights
pub const LIGHT_VOLUMES: std::ops::RangeInclusive<u32> = 110..=116;

type RequestBuilder = fn(&FetchContext) -> Vec<RemoteRequest>;

/// A [`DataSource`] defined by data rather than by a dedicated type
pub struct CatalogSource<R> {
    descriptor: DataSourceDescriptor,
    collection_key: &'static str,
    requests: RequestBuilder,
    record: PhantomData<fn() -> R>,
}

impl<R: SyncRecord> CatalogSource<R> {
    pub fn new(
        descriptor: DataSourceDescriptor,
        collection_key: &'static str,
        requests: RequestBuilder,
    ) -> Self {
        Self {
            descriptor,
            collection_key,
            requests,
            record: PhantomData,
        }
    }
}

impl<R: SyncRecord> DataSource for CatalogSource<R> {
    type Record = R;

    fn descriptor(&self) -> &DataSourceDescriptor {
        &self.descriptor
    }

    fn collection_key(&self) -> &str {
        self.collection_key
    }

    fn remote_requests(&self, context: &FetchContext) -> Vec<RemoteRequest> {
        (self.requests)(context)
    }
}

fn json_request(path: &str) -> RemoteRequest {
    RemoteRequest::new(path).with_query("output", "json")
}

fn notice_window(path: &str, context: &FetchContext) -> RemoteRequest {
    let (since, until) = context.notice_week_window();
    json_request(path)
        .with_query("includeRemovals", "false")
        .with_optional_query("minNoticeNumber", since)
        .with_query("maxNoticeNumber", until)
}

/// Anti-shipping activity messages
pub fn asam() -> CatalogSource<Asam> {
    CatalogSource::new(
        DataSourceDescriptor::new(ASAM, "Anti-Shipping Activity Messages")
            .with_bundle(BundleSpec::json("asam"))
            .with_needs_processed(NeedsProcessedPolicy::EveryMerge),
        "asam",
        |context| {
            let (since, until) = context.date_window();
            vec![
                json_request("publications/asam")
                    .with_query("sort", "date")
                    .with_optional_query("minOccurDate", since)
                    .with_query("maxOccurDate", until),
            ]
        },
    )
}

/// Mobile offshore drilling units
pub fn modu() -> CatalogSource<Modu> {
    CatalogSource::new(
        DataSourceDescriptor::new(MODU, "Mobile Offshore Drilling Units")
            .with_bundle(BundleSpec::json("modu"))
            .with_needs_processed(NeedsProcessedPolicy::EveryMerge),
        "modu",
        |context| {
            let (since, until) = context.date_window();
            vec![
                json_request("publications/modu")
                    .with_query("sort", "date")
                    .with_optional_query("minSourceDate", since)
                    .with_query("maxSourceDate", until),
            ]
        },
    )
}

/// Active broadcast navigational warnings
pub fn navigational_warning() -> CatalogSource<NavigationalWarning> {
    CatalogSource::new(
        DataSourceDescriptor::new(NAVIGATIONAL_WARNING, "Navigational Warnings")
            .with_needs_processed(NeedsProcessedPolicy::EveryMerge),
        "broadcast-warn",
        |_| vec![json_request("publications/broadcast-warn").with_query("status", "active")],
    )
}

/// Lights and buoys, one request per publication volume
pub fn light() -> CatalogSource<Light> {
    CatalogSource::new(
        DataSourceDescriptor::new(LIGHT, "Lights")
            .with_bundle(BundleSpec::json("lights"))
            .with_needs_processed(NeedsProcessedPolicy::BootstrapOnly)
            .with_post_process(true)
            .with_image_cache(true),
        "ngalol",
        |context| {
            LIGHT_VOLUMES
                .map(|volume| {
                    notice_window("publications/ngalol/lights-buoys", context)
                        .with_query("volume", volume.to_string())
                })
                .collect()
        },
    )
}

/// Radio beacons
pub fn radio_beacon() -> CatalogSource<RadioBeacon> {
    CatalogSource::new(
        DataSourceDescriptor::new(RADIO_BEACON, "Radio Beacons")
            .with_bundle(BundleSpec::json("radioBeacons"))
            .with_needs_processed(NeedsProcessedPolicy::BootstrapOnly)
            .with_image_cache(true),
        "ngalol",
        |context| vec![notice_window("publications/radio-navaids/radio-beacons", context)],
    )
}

/// Differential GPS stations
pub fn dgps_station() -> CatalogSource<DgpsStation> {
    CatalogSource::new(
        DataSourceDescriptor::new(DGPS_STATION, "Differential GPS Stations")
            .with_bundle(BundleSpec::json("dgps"))
            .with_needs_processed(NeedsProcessedPolicy::BootstrapOnly)
            .with_image_cache(true),
        "ngalol",
        |context| vec![notice_window("publications/radio-navaids/dgps", context)],
    )
}

/// World port index
pub fn port() -> CatalogSource<Port> {
    CatalogSource::new(
        DataSourceDescriptor::new(PORT, "World Ports")
            .with_bundle(BundleSpec::json("ports"))
            .with_needs_processed(NeedsProcessedPolicy::BootstrapOnly)
            .with_post_process(true),
        "ports",
        |_| vec![json_request("publications/world-port-index")],
    )
}

/// Notice to mariners publications
pub fn notice_to_mariners() -> CatalogSource<NoticeToMariners> {
    CatalogSource::new(
        DataSourceDescriptor::new(NOTICE_TO_MARINERS, "Notice to Mariners"),
        "pubs",
        |context| {
            let (since, until) = context.notice_week_window();
            vec![
                json_request("publications/ntm/pubs")
                    .with_optional_query("minNoticeNumber", since)
                    .with_query("maxNoticeNumber", until),
            ]
        },
    )
}

/// Stored electronic publications; the service returns a bare array
pub fn electronic_publication() -> CatalogSource<ElectronicPublication> {
    CatalogSource::new(
        DataSourceDescriptor::new(ELECTRONIC_PUBLICATION, "Electronic Publications"),
        "pubs",
        |_| vec![RemoteRequest::new("publications/stored-pubs")],
    )
}

/// Descriptors of every catalog source
pub fn descriptors() -> Vec<DataSourceDescriptor> {
    vec![
        asam().descriptor,
        modu().descriptor,
        navigational_warning().descriptor,
        light().descriptor,
        radio_beacon().descriptor,
        dgps_station().descriptor,
        port().descriptor,
        notice_to_mariners().descriptor,
        electronic_publication().descriptor,
    ]
}

/// Build the coordinator for a catalog source
///
/// Must be called from within a Tokio runtime.
///
/// # Returns
///
/// `None` if `key` is not a catalog source
pub fn build_coordinator(key: &str, env: &SyncEnvironment) -> Option<Arc<dyn Coordinator>> {
    fn wrap<R: SyncRecord>(source: CatalogSource<R>, env: &SyncEnvironment) -> Arc<dyn Coordinator> {
        Arc::new(SourceCoordinator::new(source, env.clone()))
    }

    let coordinator = match key {
        ASAM => wrap(asam(), env),
        MODU => wrap(modu(), env),
        NAVIGATIONAL_WARNING => wrap(navigational_warning(), env),
        LIGHT => wrap(light(), env),
        RADIO_BEACON => wrap(radio_beacon(), env),
        DGPS_STATION => wrap(dgps_station(), env),
        PORT => wrap(port(), env),
        NOTICE_TO_MARINERS => wrap(notice_to_mariners(), env),
        ELECTRONIC_PUBLICATION => wrap(electronic_publication(), env),
        _ => return None,
    };
    Some(coordinator)
}

/// Register coordinators for the enabled sources (all when `enabled` is empty)
///
/// # Returns
///
/// - `Ok(usize)`: Number of coordinators registered
/// - `Err(Error::Config)`: `enabled` names a source outside the catalog
pub fn register_catalog(
    registry: &CoordinatorRegistry,
    env: &SyncEnvironment,
    enabled: &[SourceKey],
) -> Result<usize> {
    let keys: Vec<&str> = if enabled.is_empty() {
        ALL_SOURCES.to_vec()
    } else {
        enabled.iter().map(SourceKey::as_str).collect()
    };

    for key in &keys {
        let coordinator = build_coordinator(key, env)
            .ok_or_else(|| Error::config(format!("Unknown source: {}", key)))?;
        registry.register(coordinator);
    }

    info!(sources = keys.len(), "catalog registered");
    Ok(keys.len())
}
