//! Navigation of a module tree by `ModulePath`.

use super::{SwapError, SwapResult};
use crate::asg::ModulePath;
use crate::nn::Module;

fn missing(path: &ModulePath, segment: &str) -> SwapError {
    SwapError::PathResolution {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

/// Resolves `path` one segment at a time through `Module::child`.
pub fn get_module<'a>(root: &'a dyn Module, path: &ModulePath) -> SwapResult<&'a dyn Module> {
    let mut current = root;
    for segment in path.segments() {
        current = current.child(segment).ok_or_else(|| missing(path, segment))?;
    }
    Ok(current)
}

/// Mutable slot holding the module at `path`. The root path yields `root`.
pub fn get_module_mut<'a>(
    root: &'a mut Box<dyn Module>,
    path: &ModulePath,
) -> SwapResult<&'a mut Box<dyn Module>> {
    let mut current = root;
    for segment in path.segments() {
        current = current.child_mut(segment).ok_or_else(|| missing(path, segment))?;
    }
    Ok(current)
}

/// Replaces the module at `path` on its immediate parent and returns the
/// module that was there. Siblings are not touched.
pub fn set_module(
    root: &mut Box<dyn Module>,
    path: &ModulePath,
    new: Box<dyn Module>,
) -> SwapResult<Box<dyn Module>> {
    let slot = get_module_mut(root, path)?;
    Ok(std::mem::replace(slot, new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Flatten, Linear, ModuleView, ReLU, Sequential};

    fn tree() -> Box<dyn Module> {
        Box::new(
            Sequential::new()
                .push_named("features", Sequential::new().push(ReLU::new()).push(Flatten::new()))
                .push_named("fc", Linear::new(4, 2)),
        )
    }

    #[test]
    fn test_get_nested() {
        let root = tree();
        let m = get_module(root.as_ref(), &ModulePath::parse("features.1")).unwrap();
        assert!(matches!(m.view(), ModuleView::Flatten(_)));
        let r = get_module(root.as_ref(), &ModulePath::root()).unwrap();
        assert!(matches!(r.view(), ModuleView::Container));
    }

    #[test]
    fn test_unknown_segment_fails() {
        let root = tree();
        let err = get_module(root.as_ref(), &ModulePath::parse("features.7")).unwrap_err();
        assert_eq!(
            err,
            SwapError::PathResolution {
                path: "features.7".to_string(),
                segment: "7".to_string()
            }
        );
        // leaves have no children
        assert!(get_module(root.as_ref(), &ModulePath::parse("fc.weight")).is_err());
    }

    #[test]
    fn test_set_replaces_only_the_leaf() {
        let mut root = tree();
        let sibling = get_module(root.as_ref(), &ModulePath::parse("features.1")).unwrap()
            as *const dyn Module as *const ();

        let old = set_module(&mut root, &ModulePath::parse("features.0"), Box::new(Flatten::new())).unwrap();
        assert!(matches!(old.view(), ModuleView::ReLU(_)));

        let replaced = get_module(root.as_ref(), &ModulePath::parse("features.0")).unwrap();
        assert!(matches!(replaced.view(), ModuleView::Flatten(_)));
        let sibling_after = get_module(root.as_ref(), &ModulePath::parse("features.1")).unwrap()
            as *const dyn Module as *const ();
        assert_eq!(sibling, sibling_after);
    }

    #[test]
    fn test_set_root() {
        let mut root = tree();
        let old = set_module(&mut root, &ModulePath::root(), Box::new(ReLU::new())).unwrap();
        assert!(matches!(old.view(), ModuleView::Container));
        assert!(matches!(root.view(), ModuleView::ReLU(_)));
    }
}
