//! Rigid bodies: named marker sets with body-frame geometry, and the
//! per-frame markers they have claimed.

use crate::config::{RigidBodyConfig, TrackerConfig};
use crate::{ConfigError, Detection};
use marker_track_aruco::Dictionary;
use nalgebra::{Point2, Point3};
use std::collections::HashSet;

/// Body-frame corners of one marker, TL, TR, BR, BL.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerGeometry {
    pub id: u32,
    pub corners: [Point3<f64>; 4],
}

impl MarkerGeometry {
    pub fn from_corners(id: u32, corners: [[f64; 3]; 4]) -> Self {
        Self {
            id,
            corners: corners.map(|[x, y, z]| Point3::new(x, y, z)),
        }
    }

    /// Square of side `size` centred on the origin in the `z = 0` plane.
    pub fn square(id: u32, size: f64) -> Self {
        let h = 0.5 * size;
        Self::from_corners(
            id,
            [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]],
        )
    }

    /// Parse a tag geometry table.
    ///
    /// One marker per row: `id cx cy cz` followed by the four corners as
    /// `x y z` triples. Whitespace or commas separate values; `#` starts a
    /// comment.
    pub fn parse_table(text: &str) -> Result<Vec<Self>, String> {
        let mut out = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let values = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|tok| !tok.is_empty())
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("line {}: {e}", idx + 1))?;
            if values.len() != 16 {
                return Err(format!(
                    "line {}: expected 16 values, found {}",
                    idx + 1,
                    values.len()
                ));
            }
            let id = values[0];
            if id < 0.0 || id.fract() != 0.0 || id > u32::MAX as f64 {
                return Err(format!("line {}: invalid marker id {id}", idx + 1));
            }
            let corner = |k: usize| {
                let b = 4 + 3 * k;
                [values[b], values[b + 1], values[b + 2]]
            };
            out.push(Self::from_corners(
                id as u32,
                [corner(0), corner(1), corner(2), corner(3)],
            ));
        }
        Ok(out)
    }
}

/// Image corners of one marker claimed by a body in the current frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedMarker {
    pub id: u32,
    pub corners: [Point2<f32>; 4],
}

/// A trackable set of markers from one dictionary.
#[derive(Clone, Debug)]
pub struct RigidBody {
    name: String,
    dictionary: &'static str,
    markers: Vec<MarkerGeometry>,
    observed: Vec<ObservedMarker>,
}

impl RigidBody {
    /// Build a body; marker ids must be unique and the set non-empty.
    pub fn new(
        name: impl Into<String>,
        dictionary: &Dictionary,
        markers: Vec<MarkerGeometry>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if markers.is_empty() {
            return Err(ConfigError::BodyGeometry {
                body: name,
                reason: "no markers".into(),
            });
        }
        let mut ids = HashSet::new();
        for m in &markers {
            if !ids.insert(m.id) {
                return Err(ConfigError::BodyGeometry {
                    body: name,
                    reason: format!("marker {} listed twice", m.id),
                });
            }
            if m.id as usize >= dictionary.len() {
                return Err(ConfigError::BodyGeometry {
                    body: name,
                    reason: format!("marker {} is not in {}", m.id, dictionary.name),
                });
            }
        }
        Ok(Self {
            name,
            dictionary: dictionary.name,
            markers,
            observed: Vec::new(),
        })
    }

    /// Ad-hoc body for a single marker, named `"<dictionary>:<id>"`.
    pub fn single_marker(dictionary: &Dictionary, id: u32, marker_size: f64) -> Self {
        Self {
            name: format!("{}:{id}", dictionary.name),
            dictionary: dictionary.name,
            markers: vec![MarkerGeometry::square(id, marker_size)],
            observed: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dictionary_name(&self) -> &'static str {
        self.dictionary
    }

    #[inline]
    pub fn markers(&self) -> &[MarkerGeometry] {
        &self.markers
    }

    #[inline]
    pub fn observed(&self) -> &[ObservedMarker] {
        &self.observed
    }

    /// Claim every offered detection whose id belongs to this body.
    ///
    /// Returns the claimed ids. A marker already claimed in this frame is
    /// replaced by the newer observation.
    pub fn assign<'a>(&mut self, detections: impl IntoIterator<Item = &'a Detection>) -> Vec<u32> {
        let mut claimed = Vec::new();
        for det in detections {
            if !self.markers.iter().any(|m| m.id == det.id) {
                continue;
            }
            self.observed.retain(|o| o.id != det.id);
            self.observed.push(ObservedMarker {
                id: det.id,
                corners: det.corners,
            });
            claimed.push(det.id);
        }
        claimed
    }

    /// Forget all claimed markers.
    pub fn reset(&mut self) {
        self.observed.clear();
    }

    /// Matching body-frame and image points of all claimed markers.
    pub fn correspondences(&self) -> (Vec<Point3<f64>>, Vec<Point2<f64>>) {
        let mut object = Vec::with_capacity(4 * self.observed.len());
        let mut image = Vec::with_capacity(4 * self.observed.len());
        for obs in &self.observed {
            let Some(geom) = self.markers.iter().find(|m| m.id == obs.id) else {
                continue;
            };
            for (o, i) in geom.corners.iter().zip(&obs.corners) {
                object.push(*o);
                image.push(Point2::new(i.x as f64, i.y as f64));
            }
        }
        (object, image)
    }
}

/// The configured bodies, in configuration order.
#[derive(Clone, Debug, Default)]
pub struct RigidBodyRegistry {
    bodies: Vec<RigidBody>,
}

impl RigidBodyRegistry {
    pub fn new(bodies: Vec<RigidBody>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for b in &bodies {
            if !names.insert(b.name()) {
                return Err(ConfigError::DuplicateBody(b.name.clone()));
            }
        }
        Ok(Self { bodies })
    }

    /// Build the configured bodies against the active dictionaries.
    pub fn from_config(
        config: &TrackerConfig,
        dictionaries: &[Dictionary],
    ) -> Result<Self, ConfigError> {
        let bodies = config
            .rigid_bodies
            .iter()
            .map(|cfg| build_body(cfg, dictionaries))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(bodies)
    }

    #[inline]
    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn reset(&mut self) {
        self.bodies.iter_mut().for_each(RigidBody::reset);
    }

    /// Offer one dictionary's detections to the bodies bound to it.
    ///
    /// Bodies are visited in registry order and an id claimed by an earlier
    /// body is withheld from later ones. Returns the union of claimed ids.
    pub fn assign(&mut self, dictionary: &str, detections: &[Detection]) -> HashSet<u32> {
        let mut claimed = HashSet::new();
        for body in self
            .bodies
            .iter_mut()
            .filter(|b| b.dictionary_name() == dictionary)
        {
            let offered = detections.iter().filter(|d| !claimed.contains(&d.id));
            let ids = body.assign(offered);
            claimed.extend(ids);
        }
        claimed
    }
}

fn build_body(cfg: &RigidBodyConfig, dictionaries: &[Dictionary]) -> Result<RigidBody, ConfigError> {
    if let Some((prefix, id)) = cfg.name.rsplit_once(':') {
        if id.parse::<u32>().is_ok() && dictionaries.iter().any(|d| d.name == prefix) {
            return Err(ConfigError::ReservedName(cfg.name.clone()));
        }
    }
    let dictionary = match &cfg.aruco_dictionary {
        None => dictionaries.first().copied().ok_or(ConfigError::NoDictionary)?,
        Some(name) => {
            let dict = marker_track_aruco::builtins::builtin_dictionary(name)
                .ok_or_else(|| ConfigError::UnknownDictionary(name.clone()))?;
            if !dictionaries.contains(&dict) {
                return Err(ConfigError::BodyDictionary {
                    body: cfg.name.clone(),
                    dictionary: name.clone(),
                });
            }
            dict
        }
    };
    RigidBody::new(cfg.name.clone(), &dictionary, cfg.geometry()?)
}
