//! `ke-ffi` - C ABI for the ke kernel engine.
//!
//! Every object is an opaque heap handle created by a `ke_*_create` (or
//! `ke_engine_get`) call and released by the matching destroy call. Each
//! function returns a [`KeStatus`]; on failure the message is available
//! from `ke_last_error` on the same thread. Engines come from the
//! process-wide factory, configured from `KE_*` environment variables.

mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::sync::Arc;

use ke_core::{
    matmul_dst_dtype, CopyBuffer, CopyDirection, DataType, EngineFactory, EngineKind, FormatType,
    KernelKind, KernelProp, OperatorDesc, Residency, RuntimeKind, TensorDesc,
};

/// Execute a closure that returns a `KeStatus`, catching any panics
/// and converting them into `KeStatus::Internal`.
fn catch_panic<F: FnOnce() -> KeStatus>(f: F) -> KeStatus {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            KeStatus::Internal
        }
    }
}

fn ffi<F: FnOnce() -> Result<(), KeStatus>>(f: F) -> KeStatus {
    catch_panic(|| match f() {
        Ok(()) => KeStatus::Ok,
        Err(status) => status,
    })
}

unsafe fn handle<'a, T>(ptr: *const T, what: &str) -> Result<&'a T, KeStatus> {
    ptr.as_ref()
        .ok_or_else(|| invalid(&format!("{} is null", what)))
}

unsafe fn handle_mut<'a, T>(ptr: *mut T, what: &str) -> Result<&'a mut T, KeStatus> {
    ptr.as_mut()
        .ok_or_else(|| invalid(&format!("{} is null", what)))
}

fn check_out<T>(out: *mut *mut T) -> Result<(), KeStatus> {
    if out.is_null() {
        return Err(invalid("output pointer is null"));
    }
    Ok(())
}

unsafe fn write_out<T>(out: *mut *mut T, value: T) {
    *out = Box::into_raw(Box::new(value));
}

unsafe fn destroy<T>(ptr: *mut T) -> KeStatus {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
    KeStatus::Ok
}

/// Get the shared engine for `(engine_kind, runtime_kind)` from the process
/// factory.
///
/// Ids: cpu=0, gpu=1; undef=0, opencl=1. The returned handle must be
/// released with `ke_engine_release`.
#[no_mangle]
pub unsafe extern "C" fn ke_engine_get(
    engine_kind: u32,
    runtime_kind: u32,
    engine_out: *mut *mut KeEngine,
) -> KeStatus {
    ffi(|| {
        check_out(engine_out)?;
        let kind = EngineKind::from_id(engine_kind)
            .ok_or_else(|| invalid(&format!("unknown engine kind {}", engine_kind)))?;
        let runtime = RuntimeKind::from_id(runtime_kind)
            .ok_or_else(|| invalid(&format!("unknown runtime kind {}", runtime_kind)))?;
        let engine = EngineFactory::process().create(kind, runtime).map_err(fail)?;
        unsafe { write_out(engine_out, KeEngine { engine }) };
        Ok(())
    })
}

/// Release an engine handle. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn ke_engine_release(engine: *mut KeEngine) -> KeStatus {
    destroy(engine)
}

#[no_mangle]
pub unsafe extern "C" fn ke_stream_create(
    engine: *const KeEngine,
    stream_out: *mut *mut KeStream,
) -> KeStatus {
    ffi(|| {
        let engine = unsafe { handle(engine, "engine") }?;
        check_out(stream_out)?;
        let stream = engine.engine.create_stream().map_err(fail)?;
        unsafe { write_out(stream_out, KeStream { stream }) };
        Ok(())
    })
}

/// Block until all work submitted to `stream` has completed.
#[no_mangle]
pub unsafe extern "C" fn ke_stream_synchronize(stream: *const KeStream) -> KeStatus {
    ffi(|| {
        let stream = unsafe { handle(stream, "stream") }?;
        stream.stream.synchronize().map_err(fail)
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_stream_destroy(stream: *mut KeStream) -> KeStatus {
    destroy(stream)
}

#[no_mangle]
pub unsafe extern "C" fn ke_storage_create(
    engine: *const KeEngine,
    byte_size: usize,
    storage_out: *mut *mut KeStorage,
) -> KeStatus {
    ffi(|| {
        let engine = unsafe { handle(engine, "engine") }?;
        check_out(storage_out)?;
        let storage = engine
            .engine
            .create_memory_storage(byte_size)
            .map_err(fail)?;
        unsafe { write_out(storage_out, KeStorage { storage }) };
        Ok(())
    })
}

/// Copy between `storage` and the host buffer `buffer`.
///
/// `direction` ids: host_to_host=0 and host_to_device=1 copy `buffer` into
/// the storage, device_to_host=2 copies the storage into `buffer`.
/// Device-to-device copies go through `ke_storage_copy_storage`. `stream`
/// may be null for a synchronous copy.
#[no_mangle]
pub unsafe extern "C" fn ke_storage_copy(
    storage: *const KeStorage,
    buffer: *mut c_void,
    byte_size: usize,
    direction: u32,
    stream: *const KeStream,
) -> KeStatus {
    ffi(|| {
        let storage = unsafe { handle(storage, "storage") }?;
        let direction = CopyDirection::from_id(direction)
            .ok_or_else(|| invalid(&format!("unknown copy direction {}", direction)))?;
        if buffer.is_null() && byte_size > 0 {
            return Err(invalid("buffer is null"));
        }
        let stream = unsafe { stream.as_ref() }.map(|s| &s.stream);
        let result = match direction {
            CopyDirection::HostToHost | CopyDirection::HostToDevice => {
                let src = unsafe { host_slice(buffer, byte_size) };
                storage
                    .storage
                    .copy(CopyBuffer::From(src), byte_size, direction, stream)
            }
            CopyDirection::DeviceToHost => {
                let dst = unsafe { host_slice_mut(buffer, byte_size) };
                storage
                    .storage
                    .copy(CopyBuffer::Into(dst), byte_size, direction, stream)
            }
            CopyDirection::DeviceToDevice => {
                return Err(invalid("device_to_device needs ke_storage_copy_storage"));
            }
        };
        result.map_err(fail)
    })
}

/// Read the first `byte_size` bytes of `storage` into `buffer`, whatever the
/// storage's residency.
#[no_mangle]
pub unsafe extern "C" fn ke_storage_read(
    storage: *const KeStorage,
    buffer: *mut c_void,
    byte_size: usize,
    stream: *const KeStream,
) -> KeStatus {
    ffi(|| {
        let storage = unsafe { handle(storage, "storage") }?;
        if buffer.is_null() && byte_size > 0 {
            return Err(invalid("buffer is null"));
        }
        let direction = match storage.storage.residency() {
            Residency::Host => CopyDirection::HostToHost,
            Residency::Device => CopyDirection::DeviceToHost,
        };
        let stream = unsafe { stream.as_ref() }.map(|s| &s.stream);
        let dst = unsafe { host_slice_mut(buffer, byte_size) };
        storage
            .storage
            .copy(CopyBuffer::Into(dst), byte_size, direction, stream)
            .map_err(fail)
    })
}

/// Copy `byte_size` bytes from device storage `src` into device storage
/// `dst` of the same engine.
#[no_mangle]
pub unsafe extern "C" fn ke_storage_copy_storage(
    dst: *const KeStorage,
    src: *const KeStorage,
    byte_size: usize,
    stream: *const KeStream,
) -> KeStatus {
    ffi(|| {
        let dst = unsafe { handle(dst, "dst") }?;
        let src = unsafe { handle(src, "src") }?;
        let stream = unsafe { stream.as_ref() }.map(|s| &s.stream);
        dst.storage
            .copy(
                CopyBuffer::Storage(&src.storage),
                byte_size,
                CopyDirection::DeviceToDevice,
                stream,
            )
            .map_err(fail)
    })
}

unsafe fn host_slice<'a>(ptr: *const c_void, len: usize) -> &'a [u8] {
    if len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    }
}

unsafe fn host_slice_mut<'a>(ptr: *mut c_void, len: usize) -> &'a mut [u8] {
    if len == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(ptr as *mut u8, len)
    }
}

#[no_mangle]
pub unsafe extern "C" fn ke_storage_destroy(storage: *mut KeStorage) -> KeStatus {
    destroy(storage)
}

/// Describe a row-major `[m, k] @ [k, n]` matmul.
///
/// `dtype` is the source and weight type (f32=0, s32=1, u8=2, s8=3, f16=4,
/// bf16=5); the destination is s32 for 8-bit integer sources and `dtype`
/// otherwise.
#[no_mangle]
pub unsafe extern "C" fn ke_matmul_desc_create(
    m: usize,
    k: usize,
    n: usize,
    dtype: u32,
    engine_kind: u32,
    runtime_kind: u32,
    desc_out: *mut *mut KeOpDesc,
) -> KeStatus {
    ffi(|| {
        check_out(desc_out)?;
        let dtype = DataType::from_id(dtype)
            .ok_or_else(|| invalid(&format!("unknown data type {}", dtype)))?;
        let engine = EngineKind::from_id(engine_kind)
            .ok_or_else(|| invalid(&format!("unknown engine kind {}", engine_kind)))?;
        let runtime = RuntimeKind::from_id(runtime_kind)
            .ok_or_else(|| invalid(&format!("unknown runtime kind {}", runtime_kind)))?;
        let tensor = |dims: Vec<usize>, dt| TensorDesc::new(dims, dt, FormatType::Ab);
        let descs = vec![
            tensor(vec![m, k], dtype).map_err(fail)?,
            tensor(vec![k, n], dtype).map_err(fail)?,
            tensor(vec![m, n], matmul_dst_dtype(dtype)).map_err(fail)?,
        ];
        let desc = OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            engine,
            runtime,
            descs,
            Default::default(),
        )
        .map_err(fail)?;
        unsafe {
            write_out(
                desc_out,
                KeOpDesc {
                    desc: Arc::new(desc),
                },
            )
        };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_op_desc_destroy(desc: *mut KeOpDesc) -> KeStatus {
    destroy(desc)
}

#[no_mangle]
pub unsafe extern "C" fn ke_kernel_create(
    engine: *const KeEngine,
    desc: *const KeOpDesc,
    stream: *const KeStream,
    kernel_out: *mut *mut KeKernel,
) -> KeStatus {
    ffi(|| {
        let engine = unsafe { handle(engine, "engine") }?;
        let desc = unsafe { handle(desc, "desc") }?;
        let stream = unsafe { handle(stream, "stream") }?;
        check_out(kernel_out)?;
        let kernel = engine
            .engine
            .create_kernel(Arc::clone(&desc.desc), &stream.stream)
            .map_err(fail)?;
        unsafe { write_out(kernel_out, KeKernel { kernel }) };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_kernel_init(
    kernel: *const KeKernel,
    context: *const KeContext,
) -> KeStatus {
    ffi(|| {
        let kernel = unsafe { handle(kernel, "kernel") }?;
        let context = unsafe { handle(context, "context") }?;
        context.init(&kernel.kernel).map_err(fail)
    })
}

/// Launch the kernel on the stream it was initialized with. Device kernels
/// return once enqueued; call `ke_stream_synchronize` or read the output to
/// wait for completion.
#[no_mangle]
pub unsafe extern "C" fn ke_kernel_execute(kernel: *const KeKernel) -> KeStatus {
    ffi(|| {
        let kernel = unsafe { handle(kernel, "kernel") }?;
        kernel.kernel.execute().map_err(fail)
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_kernel_destroy(kernel: *mut KeKernel) -> KeStatus {
    destroy(kernel)
}

#[no_mangle]
pub unsafe extern "C" fn ke_context_create(
    stream: *const KeStream,
    context_out: *mut *mut KeContext,
) -> KeStatus {
    ffi(|| {
        let stream = unsafe { handle(stream, "stream") }?;
        check_out(context_out)?;
        unsafe { write_out(context_out, KeContext::new(stream.stream.clone())) };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_context_add_input(
    context: *mut KeContext,
    storage: *const KeStorage,
) -> KeStatus {
    ffi(|| {
        let context = unsafe { handle_mut(context, "context") }?;
        let storage = unsafe { handle(storage, "storage") }?;
        context.inputs.push(storage.storage.clone());
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_context_add_output(
    context: *mut KeContext,
    storage: *const KeStorage,
) -> KeStatus {
    ffi(|| {
        let context = unsafe { handle_mut(context, "context") }?;
        let storage = unsafe { handle(storage, "storage") }?;
        context.outputs.push(storage.storage.clone());
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn ke_context_destroy(context: *mut KeContext) -> KeStatus {
    destroy(context)
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error on this
/// thread, or null if there is none. The caller must free the returned
/// string with `ke_free_string`.
#[no_mangle]
pub extern "C" fn ke_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `ke_last_error`.
#[no_mangle]
pub unsafe extern "C" fn ke_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
