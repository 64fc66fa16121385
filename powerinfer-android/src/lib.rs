// ============================================================================
// PowerInfer Android - JNI Interface Layer
// ============================================================================
//
// Exposes the PowerInfer inference library (a llama.cpp fork) to
// com.example.androidpowerinfer.PowerinferAndroid. Model, context, batch,
// sampler and params cross the JNI boundary as opaque jlong handles.
//
// The FFI bindings and JNI exports only exist on Android; the handle and
// logging plumbing builds everywhere so it can be tested on the host.
// ============================================================================

pub mod handle;
pub mod logging;

#[cfg(target_os = "android")]
pub mod backend;
#[cfg(target_os = "android")]
pub mod sys;

// JNI wrapper modules
#[cfg(target_os = "android")]
pub mod jni_powerinfer;

pub use handle::NativeHandle;
