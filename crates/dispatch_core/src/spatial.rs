//! Spatial operations: live driver positions and proximity queries.
//!
//! This module provides:
//!
//! - **GeoPoint / haversine_km**: great-circle distance between coordinates
//! - **DriverGeoIndex**: H3 cell → driver buckets with a reverse driver → position map
//! - **Grid disk cache**: memoised H3 disks used to enumerate candidate cells
//!
//! Default resolution is 8 (~460m average edge), which keeps a 5 km query to a
//! few hundred candidate cells.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Above this many rings a full scan is cheaper than enumerating the disk.
const MAX_DISK_RINGS: u32 = 200;

#[derive(Debug, Error, PartialEq)]
pub enum SpatialError {
    #[error("invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("radius must be a positive finite number of kilometres, got {0}")]
    InvalidRadius(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn to_cell(self, resolution: Resolution) -> Result<CellIndex, SpatialError> {
        // h3o only rejects non-finite input, so range is checked here
        if !self.is_valid() {
            return Err(SpatialError::InvalidCoordinate {
                lat: self.lat,
                lon: self.lon,
            });
        }
        LatLng::new(self.lat, self.lon)
            .map(|ll| ll.to_cell(resolution))
            .map_err(|_| SpatialError::InvalidCoordinate {
                lat: self.lat,
                lon: self.lon,
            })
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverPosition {
    pub point: GeoPoint,
    pub cell: CellIndex,
    pub updated_at: DateTime<Utc>,
}

/// One hit of a proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub point: GeoPoint,
    pub distance_km: f64,
}

#[derive(Debug, Default)]
struct IndexInner {
    /// Map from H3 cell to the drivers currently inside it
    drivers_by_cell: HashMap<CellIndex, Vec<String>>,
    /// Reverse mapping: driver → current position (for updates and lookups)
    positions: HashMap<String, DriverPosition>,
}

impl IndexInner {
    fn detach(&mut self, driver_id: &str, cell: CellIndex) {
        if let Some(drivers) = self.drivers_by_cell.get_mut(&cell) {
            drivers.retain(|d| d != driver_id);
            if drivers.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }
}

/// Live driver positions, safe to share across request handlers.
///
/// Cell buckets and the reverse map sit behind a single lock so a reader never
/// observes a driver in one without the other.
pub struct DriverGeoIndex {
    resolution: Resolution,
    inner: RwLock<IndexInner>,
    disk_cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl Default for DriverGeoIndex {
    fn default() -> Self {
        Self::new(Resolution::Eight)
    }
}

impl DriverGeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            inner: RwLock::new(IndexInner::default()),
            disk_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(1_000).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Insert or move a driver. Last write wins by `at`; an older update is
    /// ignored and reported as `false`.
    pub fn upsert(
        &self,
        driver_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<bool, SpatialError> {
        let cell = point.to_cell(self.resolution)?;
        let mut inner = self.inner.write();

        if let Some(existing) = inner.positions.get(driver_id).copied() {
            if existing.updated_at > at {
                return Ok(false);
            }
            if existing.cell != cell {
                inner.detach(driver_id, existing.cell);
                inner
                    .drivers_by_cell
                    .entry(cell)
                    .or_default()
                    .push(driver_id.to_string());
            }
        } else {
            inner
                .drivers_by_cell
                .entry(cell)
                .or_default()
                .push(driver_id.to_string());
        }

        inner.positions.insert(
            driver_id.to_string(),
            DriverPosition {
                point,
                cell,
                updated_at: at,
            },
        );
        Ok(true)
    }

    pub fn remove(&self, driver_id: &str) -> Option<DriverPosition> {
        let mut inner = self.inner.write();
        let position = inner.positions.remove(driver_id)?;
        inner.detach(driver_id, position.cell);
        Some(position)
    }

    pub fn lookup(&self, driver_id: &str) -> Option<GeoPoint> {
        self.inner.read().positions.get(driver_id).map(|p| p.point)
    }

    pub fn len(&self) -> usize {
        self.inner.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All drivers within `radius_km` of `center`, nearest first (ties by id).
    pub fn query(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<NearbyDriver>, SpatialError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(SpatialError::InvalidRadius(radius_km));
        }
        let origin = center.to_cell(self.resolution)?;
        let rings = self.rings_for_radius(radius_km);

        let inner = self.inner.read();
        let mut hits: Vec<NearbyDriver> = if rings > MAX_DISK_RINGS {
            inner
                .positions
                .iter()
                .map(|(id, pos)| (id.as_str(), pos.point))
                .filter_map(|(id, point)| within(id, center, point, radius_km))
                .collect()
        } else {
            let cells = self.grid_disk_cached(origin, rings);
            cells
                .iter()
                .filter_map(|cell| inner.drivers_by_cell.get(cell))
                .flatten()
                .filter_map(|id| {
                    let point = inner.positions.get(id)?.point;
                    within(id, center, point, radius_km)
                })
                .collect()
        };
        drop(inner);

        hits.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        Ok(hits)
    }

    /// Ring count whose disk is guaranteed to cover the radius. Uses the
    /// average edge length as the ring spacing, which underestimates the real
    /// centre-to-centre spacing and so errs on the wide side.
    fn rings_for_radius(&self, radius_km: f64) -> u32 {
        let spacing_km = self.resolution.edge_length_km();
        let rings = (radius_km / spacing_km).ceil() + 1.0;
        if rings >= f64::from(MAX_DISK_RINGS) {
            MAX_DISK_RINGS + 1
        } else {
            rings as u32
        }
    }

    fn grid_disk_cached(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = self.disk_cache.lock();
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

fn within(driver_id: &str, center: GeoPoint, point: GeoPoint, radius_km: f64) -> Option<NearbyDriver> {
    let distance_km = haversine_km(center, point);
    (distance_km <= radius_km).then(|| NearbyDriver {
        driver_id: driver_id.to_string(),
        point,
        distance_km,
    })
}
