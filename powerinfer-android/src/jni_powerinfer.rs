// ============================================================================
// JNI Wrappers for com.example.androidpowerinfer.PowerinferAndroid
// ============================================================================
//
// Every native object is handed to Kotlin as a jlong handle (see handle.rs).
// All calls arrive on the single "Llm-RunLoop" thread owned by the Kotlin
// side, so no handle is ever used from two threads at once.
//
// Errors never cross the boundary as panics: they are logged and raised as
// Java exceptions, or reported as 0/null where the Kotlin side checks for it.
// ============================================================================

use anyhow::{anyhow, Result};
use jni::objects::{JObject, JString};
use jni::sys::{jboolean, jint, jlong, jstring};
use jni::JNIEnv;
use tracing::{error, info, warn};

use common::{Batch, EngineConfig, GenerationParams, Sampler};

use crate::backend::{self, Context, Model};
use crate::handle::{free_handle, handle_mut, into_handle, NativeHandle};
use crate::logging;

const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";
const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";

fn throw(env: &mut JNIEnv, class: &str, err: &anyhow::Error) {
    error!("{:#}", err);
    // Keep the exception the JVM already has, it is the more precise one.
    if env.exception_check().unwrap_or(false) {
        return;
    }
    if let Err(e) = env.throw_new(class, format!("{:#}", err)) {
        error!("Failed to raise {}: {}", class, e);
    }
}

fn get_string(env: &mut JNIEnv, s: &JString) -> Result<String> {
    if s.is_null() {
        return Err(anyhow!("string argument is null"));
    }
    Ok(env
        .get_string(s)
        .map_err(|e| anyhow!("Failed to read Java string: {}", e))?
        .into())
}

fn new_string(env: &mut JNIEnv, s: &str) -> jstring {
    match env.new_string(s) {
        Ok(jstring) => jstring.into_raw(),
        Err(e) => {
            error!("Failed to create Java string: {}", e);
            std::ptr::null_mut()
        }
    }
}

fn free<T: NativeHandle>(env: &mut JNIEnv, handle: jlong) {
    if let Err(e) = unsafe { free_handle::<T>(handle) } {
        throw(env, ILLEGAL_ARGUMENT, &e);
    }
}

// ============================================================================
// Backend and logging
// ============================================================================

/// Java signature:
/// private external fun log_to_android()
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_log_1to_1android(
    _env: JNIEnv,
    _this: JObject,
) {
    logging::init_logging();
    backend::route_native_logs();
}

/// Java signature:
/// private external fun backend_init(numa: Boolean)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_backend_1init(
    _env: JNIEnv,
    _this: JObject,
    numa: jboolean,
) {
    backend::backend_init(numa != 0);
}

/// Java signature:
/// private external fun backend_free()
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_backend_1free(
    _env: JNIEnv,
    _this: JObject,
) {
    backend::backend_free();
}

/// Java signature:
/// private external fun system_info(): String
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_system_1info(
    mut env: JNIEnv,
    _this: JObject,
) -> jstring {
    let info = backend::system_info();
    new_string(&mut env, &info)
}

// ============================================================================
// Parameters
// ============================================================================

/// Java signature:
/// private external fun new_params(filename: String): Long
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_new_1params(
    mut env: JNIEnv,
    _this: JObject,
    filename: JString,
) -> jlong {
    match get_string(&mut env, &filename) {
        Ok(model) => into_handle(GenerationParams::new(model)),
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            0
        }
    }
}

/// Params with overrides from a TOML document.
///
/// Java signature:
/// private external fun new_params_from_config(filename: String, config: String): Long
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_new_1params_1from_1config(
    mut env: JNIEnv,
    _this: JObject,
    filename: JString,
    config: JString,
) -> jlong {
    let result = (|| -> Result<GenerationParams> {
        let model = get_string(&mut env, &filename)?;
        let config = EngineConfig::from_toml(&get_string(&mut env, &config)?)?;
        let mut params = GenerationParams::new(model);
        config.apply(&mut params);
        Ok(params)
    })();

    match result {
        Ok(params) => into_handle(params),
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            0
        }
    }
}

/// Java signature:
/// private external fun delete_params(g_params: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_delete_1params(
    mut env: JNIEnv,
    _this: JObject,
    params: jlong,
) {
    free::<GenerationParams>(&mut env, params);
}

/// Java signature:
/// private external fun describe_params(g_params: Long): String
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_describe_1params(
    mut env: JNIEnv,
    _this: JObject,
    params: jlong,
) -> jstring {
    let result = unsafe { handle_mut::<GenerationParams>(params) }.and_then(|p| p.to_json());
    match result {
        Ok(json) => new_string(&mut env, &json),
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            std::ptr::null_mut()
        }
    }
}

/// Java signature:
/// private external fun pdf_prompt(g_params: Long, pdftext: String)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_pdf_1prompt(
    mut env: JNIEnv,
    _this: JObject,
    params: jlong,
    pdf_text: JString,
) {
    let result = (|| -> Result<()> {
        let params = unsafe { handle_mut::<GenerationParams>(params)? };
        let text = get_string(&mut env, &pdf_text)?;
        info!("Document prompt set ({} bytes)", text.len());
        params.set_prompt(text);
        Ok(())
    })();

    if let Err(e) = result {
        throw(&mut env, ILLEGAL_ARGUMENT, &e);
    }
}

/// Java signature:
/// private external fun free_pdf_prompt(g_params: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_free_1pdf_1prompt(
    mut env: JNIEnv,
    _this: JObject,
    params: jlong,
) {
    match unsafe { handle_mut::<GenerationParams>(params) } {
        Ok(params) => params.clear_prompt(),
        Err(e) => throw(&mut env, ILLEGAL_ARGUMENT, &e),
    }
}

// ============================================================================
// Model and context
// ============================================================================

/// Java signature:
/// private external fun load_model(g_params: Long): Long
///
/// Returns: model handle, or 0 on failure
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_load_1model(
    mut env: JNIEnv,
    _this: JObject,
    params: jlong,
) -> jlong {
    let params = match unsafe { handle_mut::<GenerationParams>(params) } {
        Ok(params) => params,
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            return 0;
        }
    };

    match Model::load(params) {
        Ok(model) => into_handle(model),
        Err(e) => {
            error!("load_model(): {:#}", e);
            0
        }
    }
}

/// Java signature:
/// private external fun free_model(model: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_free_1model(
    mut env: JNIEnv,
    _this: JObject,
    model: jlong,
) {
    free::<Model>(&mut env, model);
}

/// Java signature:
/// private external fun new_context(model: Long, g_params: Long): Long
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_new_1context(
    mut env: JNIEnv,
    _this: JObject,
    model: jlong,
    params: jlong,
) -> jlong {
    let handles = unsafe { handle_mut::<Model>(model) }
        .and_then(|m| Ok((m, unsafe { handle_mut::<GenerationParams>(params)? })));
    let (model, params) = match handles {
        Ok(handles) => handles,
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            return 0;
        }
    };

    match Context::new(model, params) {
        Ok(context) => into_handle(context),
        Err(e) => {
            throw(&mut env, ILLEGAL_STATE, &e);
            0
        }
    }
}

/// Java signature:
/// private external fun free_context(context: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_free_1context(
    mut env: JNIEnv,
    _this: JObject,
    context: jlong,
) {
    free::<Context>(&mut env, context);
}

// ============================================================================
// Batch and sampler
// ============================================================================

/// Java signature:
/// private external fun new_batch(nTokens: Int, embd: Int, nSeqMax: Int): Long
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_new_1batch(
    mut env: JNIEnv,
    _this: JObject,
    n_tokens: jint,
    embd: jint,
    n_seq_max: jint,
) -> jlong {
    let result = (|| -> Result<Batch> {
        let n_tokens = usize::try_from(n_tokens).map_err(|_| anyhow!("nTokens is negative"))?;
        let embd = usize::try_from(embd).map_err(|_| anyhow!("embd is negative"))?;
        let n_seq_max = usize::try_from(n_seq_max).map_err(|_| anyhow!("nSeqMax is negative"))?;
        Batch::new(n_tokens, embd, n_seq_max)
    })();

    match result {
        Ok(batch) => into_handle(batch),
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            0
        }
    }
}

/// Java signature:
/// private external fun free_batch(batch: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_free_1batch(
    mut env: JNIEnv,
    _this: JObject,
    batch: jlong,
) {
    free::<Batch>(&mut env, batch);
}

/// Java signature:
/// private external fun new_sampler(g_params: Long): Long
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_new_1sampler(
    mut env: JNIEnv,
    _this: JObject,
    params: jlong,
) -> jlong {
    match unsafe { handle_mut::<GenerationParams>(params) } {
        Ok(params) => into_handle(Sampler::new(params.sampling.clone())),
        Err(e) => {
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
            0
        }
    }
}

/// Java signature:
/// private external fun free_sampler(sampler: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_free_1sampler(
    mut env: JNIEnv,
    _this: JObject,
    sampler: jlong,
) {
    free::<Sampler>(&mut env, sampler);
}

// ============================================================================
// Text Generation
// ============================================================================

/// Decode the prompt. Returns the initial `n_cur`.
///
/// Java signature:
/// private external fun completion_init(context: Long, batch: Long, text: String, nLen: Int, jparams: Long): Int
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_completion_1init(
    mut env: JNIEnv,
    _this: JObject,
    context: jlong,
    batch: jlong,
    text: JString,
    n_len: jint,
    params: jlong,
) -> jint {
    let result = (|| -> Result<i32> {
        let text = get_string(&mut env, &text)?;
        let context = unsafe { handle_mut::<Context>(context)? };
        let batch = unsafe { handle_mut::<Batch>(batch)? };
        let params = unsafe { handle_mut::<GenerationParams>(params)? };

        let Context { llama, generation } = context;
        generation.begin(llama, batch, params, &text, n_len)
    })();

    match result {
        Ok(n_cur) => n_cur,
        Err(e) => {
            throw(&mut env, ILLEGAL_STATE, &e);
            0
        }
    }
}

/// Produce the next piece of text and advance `ncur`. `null` once the
/// completion is over.
///
/// Java signature:
/// private external fun completion_loop(context: Long, batch: Long, sampler: Long, nLen: Int, ncur: IntVar): String?
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_completion_1loop(
    mut env: JNIEnv,
    _this: JObject,
    context: jlong,
    batch: jlong,
    sampler: jlong,
    n_len: jint,
    intvar_ncur: JObject,
) -> jstring {
    let result = (|| -> Result<Option<String>> {
        let context = unsafe { handle_mut::<Context>(context)? };
        let batch = unsafe { handle_mut::<Batch>(batch)? };
        let sampler = unsafe { handle_mut::<Sampler>(sampler)? };

        let n_cur = env
            .call_method(&intvar_ncur, "getValue", "()I", &[])
            .and_then(|v| v.i())
            .map_err(|e| anyhow!("IntVar.getValue() failed: {}", e))?;

        let Context { llama, generation } = context;
        let text = generation.step(llama, batch, sampler, n_len, n_cur)?;

        if text.is_some() {
            env.call_method(&intvar_ncur, "inc", "()V", &[])
                .map_err(|e| anyhow!("IntVar.inc() failed: {}", e))?;
        }
        Ok(text)
    })();

    match result {
        Ok(Some(text)) => new_string(&mut env, &text),
        Ok(None) => std::ptr::null_mut(),
        Err(e) => {
            throw(&mut env, ILLEGAL_STATE, &e);
            std::ptr::null_mut()
        }
    }
}

/// Java signature:
/// private external fun kv_cache_clear(context: Long)
#[no_mangle]
pub extern "C" fn Java_com_example_androidpowerinfer_PowerinferAndroid_kv_1cache_1clear(
    mut env: JNIEnv,
    _this: JObject,
    context: jlong,
) {
    match unsafe { handle_mut::<Context>(context) } {
        Ok(context) => {
            let Context { llama, generation } = context;
            generation.finish(llama);
        }
        Err(e) => {
            warn!("kv_cache_clear(): {:#}", e);
            throw(&mut env, ILLEGAL_ARGUMENT, &e);
        }
    }
}
