//! Opaque `jlong` handles for native objects owned by the Kotlin side.
//!
//! Every handle points at a boxed value prefixed with a per-type tag, so a
//! handle passed to the wrong native method is rejected instead of being
//! reinterpreted.

use anyhow::{bail, Result};
use common::{Batch, GenerationParams, Sampler};

pub trait NativeHandle {
    const TAG: u32;
    const NAME: &'static str;
}

impl NativeHandle for GenerationParams {
    const TAG: u32 = u32::from_be_bytes(*b"PARM");
    const NAME: &'static str = "params";
}

impl NativeHandle for Batch {
    const TAG: u32 = u32::from_be_bytes(*b"BTCH");
    const NAME: &'static str = "batch";
}

impl NativeHandle for Sampler {
    const TAG: u32 = u32::from_be_bytes(*b"SMPL");
    const NAME: &'static str = "sampler";
}

#[repr(C)]
struct Tagged<T> {
    tag: u32,
    value: T,
}

/// Move `value` to the heap and return its handle. Never returns `0`.
pub fn into_handle<T: NativeHandle>(value: T) -> i64 {
    Box::into_raw(Box::new(Tagged { tag: T::TAG, value })) as i64
}

/// Borrow the value behind `handle`.
///
/// # Safety
/// `handle` must be `0` or a value returned by [`into_handle`] that has not
/// been passed to [`free_handle`], and no other borrow of it may be live.
pub unsafe fn handle_mut<'a, T: NativeHandle>(handle: i64) -> Result<&'a mut T> {
    let tagged = tagged::<T>(handle)?;
    Ok(&mut tagged.value)
}

/// Drop the value behind `handle`. `0` is a no-op.
///
/// # Safety
/// Same as [`handle_mut`]; the handle is dangling afterwards.
pub unsafe fn free_handle<T: NativeHandle>(handle: i64) -> Result<()> {
    if handle == 0 {
        return Ok(());
    }
    let tagged = tagged::<T>(handle)? as *mut Tagged<T>;
    // Poison the tag so a stale handle is caught while the allocator still
    // has the block.
    (*tagged).tag = 0;
    drop(Box::from_raw(tagged));
    Ok(())
}

unsafe fn tagged<'a, T: NativeHandle>(handle: i64) -> Result<&'a mut Tagged<T>> {
    if handle == 0 {
        bail!("{} handle is null", T::NAME);
    }
    // Every `Tagged<_>` starts with its tag, so only those four bytes are
    // read until the type is known to match.
    let tag = std::ptr::read(handle as *const u32);
    if tag != T::TAG {
        bail!("handle {:#x} is not a {} handle", handle, T::NAME);
    }
    Ok(&mut *(handle as *mut Tagged<T>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SamplingParams;
    use std::rc::Rc;

    struct Probe(Rc<()>);

    impl NativeHandle for Probe {
        const TAG: u32 = u32::from_be_bytes(*b"PRBE");
        const NAME: &'static str = "probe";
    }

    #[test]
    fn test_round_trip_and_mutation() {
        let handle = into_handle(GenerationParams::new("m.gguf"));
        assert_ne!(handle, 0);

        unsafe {
            handle_mut::<GenerationParams>(handle).unwrap().set_prompt("doc");
            assert_eq!(handle_mut::<GenerationParams>(handle).unwrap().prompt, "doc");
            free_handle::<GenerationParams>(handle).unwrap();
        }
    }

    #[test]
    fn test_null_handle() {
        unsafe {
            let err = handle_mut::<Batch>(0).unwrap_err();
            assert!(err.to_string().contains("batch handle is null"));
            assert!(free_handle::<Batch>(0).is_ok());
        }
    }

    #[test]
    fn test_wrong_handle_type_is_rejected() {
        let handle = into_handle(Sampler::new(SamplingParams::default()));
        unsafe {
            let err = handle_mut::<Batch>(handle).unwrap_err();
            assert!(err.to_string().contains("not a batch handle"));
            assert!(free_handle::<GenerationParams>(handle).is_err());
            free_handle::<Sampler>(handle).unwrap();
        }
    }

    #[derive(Debug)]
    struct Large([u64; 512]);

    impl NativeHandle for Large {
        const TAG: u32 = u32::from_be_bytes(*b"LRGE");
        const NAME: &'static str = "large";
    }

    #[test]
    fn test_small_handle_read_as_large_type() {
        let handle = into_handle(Probe(Rc::new(())));
        unsafe {
            let err = handle_mut::<Large>(handle).unwrap_err();
            assert!(err.to_string().contains("not a large handle"));
            assert!(free_handle::<Large>(handle).is_err());
            free_handle::<Probe>(handle).unwrap();
        }

        let handle = into_handle(Large([7; 512]));
        unsafe {
            assert_eq!(handle_mut::<Large>(handle).unwrap().0[511], 7);
            free_handle::<Large>(handle).unwrap();
        }
    }

    #[test]
    fn test_free_drops_value() {
        let marker = Rc::new(());
        let handle = into_handle(Probe(marker.clone()));
        assert_eq!(Rc::strong_count(&marker), 2);
        unsafe {
            free_handle::<Probe>(handle).unwrap();
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
