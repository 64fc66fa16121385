use std::env;
use std::path::PathBuf;

// Links the JNI library against PowerInfer's libllama on Android.
//
// The output is libpowerinfer_android.so (cargo turns the `-` in the crate
// name into `_`). Kotlin must call System.loadLibrary("powerinfer_android"),
// or the file has to be renamed to libpowerinfer-android.so when packaging.
fn main() {
    println!("cargo:rerun-if-env-changed=POWERINFER_LIB_DIR");
    println!("cargo:rerun-if-env-changed=POWERINFER_LINK_STATIC");

    // Get the target OS from Cargo environment variable
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    // The FFI layer only exists on Android; host builds (and tests) need no native library.
    if target_os != "android" {
        return;
    }

    match env::var("POWERINFER_LIB_DIR") {
        Ok(dir) => {
            let dir = PathBuf::from(dir);
            if !dir.exists() {
                println!(
                    "cargo:warning=POWERINFER_LIB_DIR {} does not exist",
                    dir.display()
                );
            }
            println!("cargo:rustc-link-search=native={}", dir.display());
        }
        Err(_) => {
            println!(
                "cargo:warning=POWERINFER_LIB_DIR not set; expecting libllama on the default linker path"
            );
        }
    }

    if env::var("POWERINFER_LINK_STATIC").is_ok() {
        // Static archives from the PowerInfer CMake build pull in the NDK C++ runtime.
        println!("cargo:rustc-link-lib=static=llama");
        println!("cargo:rustc-link-lib=static=ggml_static");
        println!("cargo:rustc-link-lib=dylib=c++_shared");
    } else {
        println!("cargo:rustc-link-lib=dylib=llama");
    }
    println!("cargo:rustc-link-lib=dylib=log");
}
