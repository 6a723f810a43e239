use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::components::stroke::StrokeId;
use crate::geometry::Point;
use crate::masks::Mask;
use crate::masks::store::MaskStore;
use crate::{log_info, log_warn};

/// Shared flag checked by a background resolution before it reports back.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of one mask request, tagged with the stroke that asked for it.
#[derive(Debug)]
pub struct MaskResolution {
    pub stroke: StrokeId,
    pub mask: Option<Mask>,
}

/// Runs mask lookups on the rayon pool so pointer handling never blocks on
/// extraction. At most one request is live; issuing a new one cancels the old.
pub struct MaskResolver {
    store: Arc<MaskStore>,
    sender: Sender<MaskResolution>,
    receiver: Receiver<MaskResolution>,
    in_flight: Option<(StrokeId, CancelToken)>,
}

impl MaskResolver {
    pub fn new(store: Arc<MaskStore>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            store,
            sender,
            receiver,
            in_flight: None,
        }
    }

    pub fn store(&self) -> &Arc<MaskStore> {
        &self.store
    }

    pub fn pending(&self) -> Option<StrokeId> {
        self.in_flight.as_ref().map(|(id, _)| *id)
    }

    /// Start resolving the mask under `seed` for `stroke`.
    pub fn request(&mut self, stroke: StrokeId, seed: Point) {
        self.cancel();
        let token = CancelToken::default();
        self.in_flight = Some((stroke, token.clone()));

        let store = Arc::clone(&self.store);
        let sender = self.sender.clone();
        let (x, y) = seed.to_pixel();
        rayon::spawn(move || {
            if token.is_cancelled() {
                return;
            }
            let mask = store.mask_at(x, y);
            if token.is_cancelled() {
                return;
            }
            let _ = sender.send(MaskResolution { stroke, mask });
        });
    }

    /// Drop the in-flight request, if any. A result already queued is
    /// discarded by the next [`poll`](Self::poll).
    pub fn cancel(&mut self) {
        if let Some((_, token)) = self.in_flight.take() {
            token.cancel();
        }
    }

    /// Resolve synchronously on the calling thread.
    pub fn resolve_now(&self, seed: Point) -> Option<Mask> {
        let (x, y) = seed.to_pixel();
        self.store.mask_at(x, y)
    }

    /// Non-blocking. Returns the resolution for the in-flight request once it
    /// arrives; results for any other stroke are dropped as stale.
    pub fn poll(&mut self) -> Option<MaskResolution> {
        while let Ok(resolution) = self.receiver.try_recv() {
            if let Some(accepted) = self.accept(resolution) {
                return Some(accepted);
            }
        }
        None
    }

    /// Block up to `timeout` for the in-flight request.
    pub fn wait(&mut self, timeout: Duration) -> Option<MaskResolution> {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(resolution) => {
                    if let Some(accepted) = self.accept(resolution) {
                        return Some(accepted);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }

    fn accept(&mut self, resolution: MaskResolution) -> Option<MaskResolution> {
        match &self.in_flight {
            Some((id, token)) if *id == resolution.stroke && !token.is_cancelled() => {
                self.in_flight = None;
                Some(resolution)
            }
            _ => {
                log_info!("Dropping stale mask resolution for stroke {:?}", resolution.stroke);
                None
            }
        }
    }
}

impl Drop for MaskResolver {
    fn drop(&mut self) {
        if self.in_flight.is_some() {
            log_warn!("Mask resolver dropped with a request in flight");
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::Bitmap;
    use crate::masks::store::{MaskMode, StoreOptions};
    use image::{Rgba, RgbaImage};

    fn store() -> Arc<MaskStore> {
        let mut img = RgbaImage::new(16, 16);
        for y in 0..16 {
            img.put_pixel(8, y, Rgba([0, 0, 0, 255]));
        }
        let bmp = Arc::new(Bitmap::from_rgba_image(&img).unwrap());
        Arc::new(MaskStore::new(bmp, MaskMode::OnDemand, StoreOptions::default()))
    }

    #[test]
    fn resolution_is_tagged_with_requesting_stroke() {
        let mut r = MaskResolver::new(store());
        r.request(StrokeId(4), Point::new(2.0, 2.0));
        let res = r.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(res.stroke, StrokeId(4));
        assert_eq!(res.mask.unwrap().rect().width, 8);
        assert!(r.pending().is_none());
    }

    #[test]
    fn superseded_request_is_never_delivered() {
        let mut r = MaskResolver::new(store());
        r.request(StrokeId(1), Point::new(2.0, 2.0));
        r.request(StrokeId(2), Point::new(12.0, 2.0));
        let res = r.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(res.stroke, StrokeId(2));
        assert_eq!(res.mask.unwrap().rect().x, 9);
        // anything still arriving for stroke 1 is stale
        std::thread::sleep(Duration::from_millis(20));
        assert!(r.poll().is_none());
    }

    #[test]
    fn cancelled_request_yields_nothing() {
        let mut r = MaskResolver::new(store());
        r.request(StrokeId(1), Point::new(2.0, 2.0));
        r.cancel();
        assert!(r.wait(Duration::from_millis(50)).is_none());
        assert!(r.poll().is_none());
    }

    #[test]
    fn boundary_seed_resolves_to_no_mask() {
        let mut r = MaskResolver::new(store());
        r.request(StrokeId(9), Point::new(8.5, 3.0));
        let res = r.wait(Duration::from_secs(5)).unwrap();
        assert!(res.mask.is_none());
    }
}
