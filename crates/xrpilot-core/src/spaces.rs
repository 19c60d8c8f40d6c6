//! Reference spaces created for a session.

use tracing::{debug, info, warn};

use crate::runtime::XrRuntime;
use crate::types::{Extent2Df, ReferenceSpaceKind, SessionHandle, SpaceHandle};
use crate::{XrError, XrResult};

#[derive(Debug, Clone, Copy)]
struct ReferenceSpace {
    kind: ReferenceSpaceKind,
    handle: SpaceHandle,
    bounds: Option<Extent2Df>,
}

/// The view/local/stage spaces a session supports. Kinds the runtime does not
/// enumerate are skipped.
#[derive(Debug, Default)]
pub struct ReferenceSpaces {
    spaces: Vec<ReferenceSpace>,
}

impl ReferenceSpaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_all<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
    ) -> XrResult<usize> {
        let supported = runtime.enumerate_reference_spaces(session)?;
        debug!(?supported, "reference spaces offered");
        for kind in ReferenceSpaceKind::ALL.iter().copied() {
            if !supported.contains(&kind) {
                info!(%kind, "reference space not supported, skipped");
                continue;
            }
            if self.contains(kind) {
                continue;
            }
            let handle = runtime.create_reference_space(session, kind)?;
            self.spaces.push(ReferenceSpace {
                kind,
                handle,
                bounds: None,
            });
            let bounds = runtime.reference_space_bounds(session, kind)?;
            match bounds {
                Some(extent) => info!(%kind, width = extent.width, height = extent.height, "reference space bounds"),
                None => info!(%kind, "reference space has no bounds"),
            }
            if let Some(space) = self.spaces.last_mut() {
                space.bounds = bounds;
            }
        }
        Ok(self.spaces.len())
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn contains(&self, kind: ReferenceSpaceKind) -> bool {
        self.spaces.iter().any(|space| space.kind == kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ReferenceSpaceKind> + '_ {
        self.spaces.iter().map(|space| space.kind)
    }

    /// Handle of a created space; unknown kinds are a caller error.
    pub fn get(&self, kind: ReferenceSpaceKind) -> XrResult<SpaceHandle> {
        self.spaces
            .iter()
            .find(|space| space.kind == kind)
            .map(|space| space.handle)
            .ok_or(XrError::InvalidReferenceSpace(kind))
    }

    pub fn bounds(&self, kind: ReferenceSpaceKind) -> XrResult<Option<Extent2Df>> {
        self.spaces
            .iter()
            .find(|space| space.kind == kind)
            .map(|space| space.bounds)
            .ok_or(XrError::InvalidReferenceSpace(kind))
    }

    /// Destroy every space. Keeps going past failures and returns the first
    /// one.
    pub fn destroy_all<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) -> XrResult<()> {
        let mut first_err = None;
        for space in self.spaces.drain(..) {
            if let Err(err) = runtime.destroy_space(space.handle) {
                warn!(kind = %space.kind, "destroying reference space failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRuntime, RuntimeCall};

    #[test]
    fn test_creates_only_supported_kinds() {
        let mut runtime = MockRuntime::new()
            .with_reference_spaces(vec![ReferenceSpaceKind::View, ReferenceSpaceKind::Local]);
        let (_, session) = runtime.quick_session();
        let mut spaces = ReferenceSpaces::new();
        assert_eq!(spaces.create_all(&mut runtime, session).unwrap(), 2);
        assert!(spaces.get(ReferenceSpaceKind::Local).is_ok());
        assert!(matches!(
            spaces.get(ReferenceSpaceKind::Stage),
            Err(XrError::InvalidReferenceSpace(ReferenceSpaceKind::Stage))
        ));
        assert_eq!(runtime.count(RuntimeCall::ReferenceSpaceBounds), 2);
    }

    #[test]
    fn test_stage_bounds_are_kept() {
        let mut runtime = MockRuntime::new().with_stage_bounds(Extent2Df {
            width: 3.0,
            height: 2.5,
        });
        let (_, session) = runtime.quick_session();
        let mut spaces = ReferenceSpaces::new();
        spaces.create_all(&mut runtime, session).unwrap();
        assert_eq!(
            spaces.bounds(ReferenceSpaceKind::Stage).unwrap(),
            Some(Extent2Df {
                width: 3.0,
                height: 2.5
            })
        );
        assert_eq!(spaces.bounds(ReferenceSpaceKind::View).unwrap(), None);
    }

    #[test]
    fn test_destroy_all_empties() {
        let mut runtime = MockRuntime::new();
        let (_, session) = runtime.quick_session();
        let mut spaces = ReferenceSpaces::new();
        spaces.create_all(&mut runtime, session).unwrap();
        spaces.destroy_all(&mut runtime).unwrap();
        assert!(spaces.is_empty());
        assert_eq!(runtime.count(RuntimeCall::DestroySpace), 3);
    }
}
