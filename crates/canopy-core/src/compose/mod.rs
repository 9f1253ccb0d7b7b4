//! Layer composition and the process-lifetime expression cache.
//!
//! The composer is an explicit cache object with an injectable lifetime,
//! owned by the caller (typically one per process or per worker). The first
//! caller to request an uncached layer builds and publishes it under a lock;
//! later callers observe the cached `Arc` without rebuilding. The composed
//! surface is immutable once published and may be read concurrently by any
//! number of aggregations.

pub mod builders;

use crate::backend::GeoBackend;
use crate::error::{Error, Result};
use crate::expr::{LayerExpr, Surface, WATER_FLAG_BAND};
use crate::registry::LayerRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct LayerComposer {
    registry: Arc<LayerRegistry>,
    backend: Arc<dyn GeoBackend>,
    /// Layer-key → registered expression. Append-only until `clear_cache`.
    layers: Mutex<HashMap<String, Arc<LayerExpr>>>,
    surface: Mutex<Option<Arc<Surface>>>,
    /// Band validation is off by default: it historically added multi-second
    /// latency to every composition, and a mismatch is caught downstream by
    /// the column-order invariant anyway.
    validate: bool,
}

impl LayerComposer {
    pub fn new(registry: Arc<LayerRegistry>, backend: Arc<dyn GeoBackend>) -> Self {
        Self {
            registry,
            backend,
            layers: Mutex::new(HashMap::new()),
            surface: Mutex::new(None),
            validate: false,
        }
    }

    /// Enable validation of the composed surface's band set against the
    /// registry. A mismatch then fails composition with
    /// [`Error::Composition`].
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn GeoBackend> {
        &self.backend
    }

    /// Build one layer, or return the cached expression if it was already
    /// built in this composer's lifetime.
    ///
    /// Excluded layers and layers the platform cannot currently serve build
    /// as the empty layer rather than failing the composition; both cases
    /// are logged.
    pub fn get_layer(&self, key: &str) -> Result<Arc<LayerExpr>> {
        let mut cache = self.layers.lock().expect("layer cache poisoned");
        if let Some(expr) = cache.get(key) {
            debug!(layer = key, "layer cache hit");
            return Ok(expr.clone());
        }

        let descriptor = self
            .registry
            .get(key)
            .ok_or_else(|| Error::Configuration(format!("layer `{key}` is not in the registry")))?;

        let expr = if descriptor.exclude {
            warn!(layer = key, "layer is excluded; composing empty layer");
            Arc::new(LayerExpr::empty())
        } else {
            // Registry load guarantees the build function exists.
            let built = builders::build(key).ok_or_else(|| {
                Error::Schema(format!("no build function registered for layer `{key}`"))
            })?;
            match self.backend.register_layer(key, built) {
                Ok(handle) => {
                    debug!(layer = key, "layer built and registered");
                    handle
                }
                Err(e) => {
                    warn!(layer = key, error = %e, "layer unavailable; composing empty layer");
                    Arc::new(LayerExpr::empty())
                }
            }
        };

        cache.insert(key.to_string(), expr.clone());
        Ok(expr)
    }

    /// Build the composed surface: every active layer (area-weighted) plus
    /// the derived water flag, merged into one multiband expression. Cached
    /// for the composer's lifetime; the second call issues no backend calls.
    pub fn get_surface(&self) -> Result<Arc<Surface>> {
        let mut cached = self.surface.lock().expect("surface cache poisoned");
        if let Some(surface) = cached.as_ref() {
            debug!("surface cache hit");
            return Ok(surface.clone());
        }

        let mut bands: Vec<(String, Arc<LayerExpr>)> = Vec::with_capacity(self.registry.len() + 1);
        let mut skipped: Vec<&str> = Vec::new();
        for descriptor in self.registry.active() {
            let expr = self.get_layer(&descriptor.key)?;
            if expr.is_empty() {
                skipped.push(&descriptor.key);
            }
            // Area weighting: a plain sum over the band yields hectares.
            bands.push((
                descriptor.key.clone(),
                Arc::new(expr.as_ref().clone().scale_by_area()),
            ));
        }
        if !skipped.is_empty() {
            warn!(layers = ?skipped, "composed surface with skipped layers");
        }

        let water = match self.backend.register_layer(WATER_FLAG_BAND, builders::water_flag()) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(error = %e, "water dataset unavailable; water flag empty");
                Arc::new(LayerExpr::empty())
            }
        };
        bands.push((
            WATER_FLAG_BAND.to_string(),
            Arc::new(water.as_ref().clone().scale_by_area()),
        ));

        let surface = self.backend.merge(bands).map_err(|e| Error::remote(1, e))?;

        if self.validate {
            let band_names: Vec<&str> = surface
                .band_names()
                .into_iter()
                .filter(|b| *b != WATER_FLAG_BAND)
                .collect();
            let diff = self.registry.validate(&band_names);
            if !diff.is_empty() {
                return Err(Error::Composition {
                    missing: diff.missing,
                    unexpected: diff.unexpected,
                });
            }
        }

        *cached = Some(surface.clone());
        Ok(surface)
    }

    /// Drop every cached layer and the composed surface. The next call
    /// rebuilds from scratch.
    pub fn clear_cache(&self) {
        self.layers.lock().expect("layer cache poisoned").clear();
        *self.surface.lock().expect("surface cache poisoned") = None;
    }
}
