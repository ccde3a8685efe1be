//! Bitrate selection and request planning.
//!
//! # Responsibilities
//! - Own a client's catalog and throughput estimate
//! - Pick the bitrate for the next segment request
//! - Decide how each GET is forwarded (manifest pair, rewritten segment,
//!   untouched)
//!
//! # Design Decisions
//! - The process-wide fallback (`GlobalBest`) is explicit state owned by
//!   the event loop and lent to controllers, not a hidden global
//! - The headroom factor is configuration, defaulting to 1.5

use std::time::Duration;

use crate::abr::catalog::BitrateCatalog;
use crate::abr::estimator::ThroughputEstimator;
use crate::abr::uri::{self, ContentKind};
use crate::config::AbrConfig;
use crate::http::ProtocolError;

/// Default headroom: a bitrate is sustainable if `1.5 × bitrate ≤ throughput`.
pub const DEFAULT_THRESHOLD_FACTOR: f64 = 1.5;

/// Last bitrate successfully selected by any session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalBest {
    bitrate: Option<u32>,
}

impl GlobalBest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<u32> {
        self.bitrate
    }

    fn seed(&mut self, bitrate: u32) {
        if self.bitrate.is_none() {
            self.bitrate = Some(bitrate);
        }
    }

    fn update(&mut self, bitrate: u32) {
        self.bitrate = Some(bitrate);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Catalog,
    GlobalBest,
    Floor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub bitrate: u32,
    pub source: SelectionSource,
}

/// How a GET request is sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPlan {
    /// Fetch the manifest for the catalog, then its no-list variant for the player.
    Manifest { nolist_uri: String },
    /// Fetch the segment at the selected bitrate.
    Segment {
        uri: String,
        chunk: String,
        selection: Selection,
    },
    PassThrough,
}

/// Per-client adaptation state.
#[derive(Debug, Clone)]
pub struct BitrateController {
    catalog: Option<BitrateCatalog>,
    estimator: ThroughputEstimator,
    threshold_factor: f64,
    floor_bitrate: u32,
    current_best: Option<u32>,
}

impl BitrateController {
    pub fn new(config: &AbrConfig) -> Self {
        Self {
            catalog: None,
            estimator: ThroughputEstimator::new(config.alpha, config.initial_throughput_kbps),
            threshold_factor: config.threshold_factor,
            floor_bitrate: config.floor_bitrate_kbps,
            current_best: None,
        }
    }

    pub fn catalog(&self) -> Option<&BitrateCatalog> {
        self.catalog.as_ref()
    }

    pub fn average_kbps(&self) -> f64 {
        self.estimator.average_kbps()
    }

    /// Bitrate chosen by the most recent selection.
    pub fn current_best(&self) -> Option<u32> {
        self.current_best
    }

    /// Install the catalog from a manifest body.
    ///
    /// Returns false if this client already has a catalog; it is kept as is.
    pub fn populate_from_manifest(&mut self, body: &[u8], global: &mut GlobalBest) -> bool {
        if self.catalog.is_some() {
            return false;
        }

        let catalog = BitrateCatalog::populate_from_manifest(body);
        if let Some(lowest) = catalog.lowest() {
            global.seed(lowest);
        }
        self.catalog = Some(catalog);
        true
    }

    /// Fold a completed segment transfer into the estimate.
    pub fn record_sample(&mut self, bytes: u64, elapsed: Duration) -> Option<f64> {
        self.estimator.record_sample(bytes, elapsed)
    }

    /// Largest sustainable catalog bitrate, else the global best, else the floor.
    pub fn select_bitrate(&mut self, global: &mut GlobalBest) -> Selection {
        let avg = self.estimator.average_kbps();
        let mut best: Option<u32> = None;

        if let Some(catalog) = &self.catalog {
            for bitrate in catalog.iter() {
                let sustainable = f64::from(bitrate) * self.threshold_factor <= avg;
                if sustainable && best.map_or(true, |current| bitrate > current) {
                    best = Some(bitrate);
                }
            }
        }

        let selection = match (best, global.get()) {
            (Some(bitrate), _) => {
                global.update(bitrate);
                Selection {
                    bitrate,
                    source: SelectionSource::Catalog,
                }
            }
            (None, Some(bitrate)) => Selection {
                bitrate,
                source: SelectionSource::GlobalBest,
            },
            (None, None) => Selection {
                bitrate: self.floor_bitrate,
                source: SelectionSource::Floor,
            },
        };

        self.current_best = Some(selection.bitrate);
        selection
    }

    /// Decide how a GET for `request_uri` is forwarded.
    pub fn plan_request(
        &mut self,
        request_uri: &str,
        global: &mut GlobalBest,
    ) -> Result<RequestPlan, ProtocolError> {
        let parsed = uri::parse_uri(request_uri)?;

        match parsed.kind {
            ContentKind::Manifest => Ok(RequestPlan::Manifest {
                nolist_uri: uri::nolist_manifest_uri(request_uri),
            }),
            ContentKind::Segment => {
                let selection = self.select_bitrate(global);
                let rewritten = uri::rewrite_segment_uri(&parsed, selection.bitrate)
                    .ok_or(ProtocolError::BadRequest)?;
                let chunk = rewritten
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_owned();
                Ok(RequestPlan::Segment {
                    uri: rewritten,
                    chunk,
                    selection,
                })
            }
            ContentKind::Other => Ok(RequestPlan::PassThrough),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(initial: f64) -> BitrateController {
        let config = AbrConfig {
            alpha: 0.5,
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
            floor_bitrate_kbps: 10,
            initial_throughput_kbps: initial,
        };
        BitrateController::new(&config)
    }

    fn with_catalog(initial: f64, global: &mut GlobalBest) -> BitrateController {
        let mut c = controller(initial);
        assert!(c.populate_from_manifest(
            br#"<media bitrate="500"/><media bitrate="1000"/><media bitrate="2000"/>"#,
            global,
        ));
        c
    }

    #[test]
    fn picks_largest_sustainable_bitrate() {
        let mut global = GlobalBest::new();
        let mut c = with_catalog(1600.0, &mut global);
        let selection = c.select_bitrate(&mut global);
        assert_eq!(selection.bitrate, 1000);
        assert_eq!(selection.source, SelectionSource::Catalog);
        assert_eq!(global.get(), Some(1000));
    }

    #[test]
    fn boundary_is_inclusive() {
        let mut global = GlobalBest::new();
        let mut c = with_catalog(3000.0, &mut global);
        assert_eq!(c.select_bitrate(&mut global).bitrate, 2000);
    }

    #[test]
    fn zero_throughput_falls_back_to_global_best() {
        let mut global = GlobalBest::new();
        let mut c = with_catalog(0.0, &mut global);
        // Seeded with the lowest bitrate of the first catalog.
        let selection = c.select_bitrate(&mut global);
        assert_eq!(selection.bitrate, 500);
        assert_eq!(selection.source, SelectionSource::GlobalBest);
    }

    #[test]
    fn floor_without_any_catalog() {
        let mut global = GlobalBest::new();
        let mut c = controller(0.0);
        let selection = c.select_bitrate(&mut global);
        assert_eq!(selection.bitrate, 10);
        assert_eq!(selection.source, SelectionSource::Floor);
        assert_eq!(global.get(), None);
    }

    #[test]
    fn empty_manifest_uses_global_best_of_other_sessions() {
        let mut global = GlobalBest::new();
        let mut other = with_catalog(5000.0, &mut global);
        assert_eq!(other.select_bitrate(&mut global).bitrate, 2000);

        let mut c = controller(5000.0);
        assert!(c.populate_from_manifest(b"<manifest/>", &mut global));
        let selection = c.select_bitrate(&mut global);
        assert_eq!(selection.bitrate, 2000);
        assert_eq!(selection.source, SelectionSource::GlobalBest);
    }

    #[test]
    fn selection_is_monotone_in_throughput() {
        let mut previous = 0;
        for step in 0..60 {
            let mut global = GlobalBest::new();
            let mut c = with_catalog(f64::from(step) * 100.0, &mut global);
            let bitrate = c.select_bitrate(&mut global).bitrate;
            assert!(bitrate >= previous, "step {step}: {bitrate} < {previous}");
            previous = bitrate;
        }
    }

    #[test]
    fn catalog_is_immutable_once_set() {
        let mut global = GlobalBest::new();
        let mut c = with_catalog(1600.0, &mut global);
        assert!(!c.populate_from_manifest(br#"bitrate="9000""#, &mut global));
        assert!(!c.catalog().unwrap().contains(9000));
    }

    #[test]
    fn segment_plan_rewrites_uri() {
        let mut global = GlobalBest::new();
        let mut c = with_catalog(1600.0, &mut global);
        let plan = c.plan_request("/vod/500Seg3-Frag7", &mut global).unwrap();
        assert_eq!(
            plan,
            RequestPlan::Segment {
                uri: "/vod/1000Seg3-Frag7".into(),
                chunk: "1000Seg3-Frag7".into(),
                selection: Selection {
                    bitrate: 1000,
                    source: SelectionSource::Catalog
                },
            }
        );
        assert_eq!(c.current_best(), Some(1000));
    }

    #[test]
    fn manifest_and_other_plans() {
        let mut global = GlobalBest::new();
        let mut c = controller(1000.0);
        assert_eq!(
            c.plan_request("/vod/big_buck_bunny.f4m", &mut global).unwrap(),
            RequestPlan::Manifest {
                nolist_uri: "/vod/big_buck_bunny_nolist.f4m".into()
            }
        );
        assert_eq!(
            c.plan_request("/player.swf", &mut global).unwrap(),
            RequestPlan::PassThrough
        );
        assert_eq!(
            c.plan_request("/vod/badSeg-Frag", &mut global),
            Err(ProtocolError::BadRequest)
        );
    }
}
