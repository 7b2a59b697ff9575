use anyhow::Result;
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    #[cfg_attr(not(feature = "vision-coral"), allow(dead_code))]
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

/// Owned TFLite interpreter over one model file. Face detection and emotion
/// classification each hold their own.
pub struct Interpreter {
    path: String,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg(feature = "vision-coral")]
    delegate: Option<*mut TfLiteDelegate>,
}

// The raw handles are only touched through &mut self.
unsafe impl Send for Interpreter {}

impl Interpreter {
    pub fn load(model_path: &str, num_threads: i32, use_coral: bool) -> Result<Self> {
        let cpath = CString::new(model_path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if opts.is_null() {
            unsafe { TfLiteModelDelete(model) };
            anyhow::bail!("failed to create tflite options");
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, num_threads.max(1)); }

        // From here on Drop releases whatever has been created.
        let mut this = Self {
            path: model_path.to_string(),
            model,
            opts,
            interp: ptr::null_mut(),
            #[cfg(feature = "vision-coral")]
            delegate: None,
        };

        #[cfg(feature = "vision-coral")]
        if use_coral {
            let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null()) };
            anyhow::ensure!(!d.is_null(), "failed to create EdgeTPU delegate");
            unsafe { TfLiteInterpreterOptionsAddDelegate(this.opts, d); }
            this.delegate = Some(d);
        }

        #[cfg(not(feature = "vision-coral"))]
        if use_coral {
            anyhow::bail!("vision.use_coral=true but binary not built with --features vision-coral");
        }

        this.interp = unsafe { TfLiteInterpreterCreate(this.model, this.opts) };
        anyhow::ensure!(!this.interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(this.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("vision: loaded TFLite model: {}", model_path);
        Ok(this)
    }

    pub fn inspect(&mut self) -> Result<String> {
        let (in_dims, in_bytes) = {
            let t = self.input_tensor()?;
            (tensor_dims(t), unsafe { TfLiteTensorByteSize(t) })
        };
        let (out_dims, out_bytes) = {
            let t = self.output_tensor(0)?;
            (tensor_dims(t), unsafe { TfLiteTensorByteSize(t) })
        };
        Ok(format!(
            "{}:\n- input[0] dims={:?} bytes={}\n- output[0] dims={:?} bytes={}\n",
            self.path, in_dims, in_bytes, out_dims, out_bytes
        ))
    }

    pub fn input_dims(&mut self) -> Result<Vec<i32>> {
        Ok(tensor_dims(self.input_tensor()?))
    }

    pub fn write_input_u8(&mut self, data: &[u8]) -> Result<()> {
        let input = self.input_tensor()?;
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        anyhow::ensure!(in_bytes == data.len(), "input tensor is {} bytes, got {}", in_bytes, data.len());
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), in_ptr, data.len()); }
        Ok(())
    }

    pub fn write_input_f32(&mut self, data: &[f32]) -> Result<()> {
        let input = self.input_tensor()?;
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let need = std::mem::size_of_val(data);
        anyhow::ensure!(in_bytes == need, "input tensor is {} bytes, got {}", in_bytes, need);
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut f32 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), in_ptr, data.len()); }
        Ok(())
    }

    pub fn invoke(&mut self) -> Result<()> {
        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed ({})", self.path);
        Ok(())
    }

    /// Copies output tensor `index` out as f32 with its dims.
    pub fn output_f32(&mut self, index: i32) -> Result<(Vec<i32>, Vec<f32>)> {
        let out = self.output_tensor(index)?;
        let dims = tensor_dims(out);
        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_bytes = unsafe { TfLiteTensorByteSize(out) };
        let out_len = out_bytes / std::mem::size_of::<f32>();
        let raw = unsafe { std::slice::from_raw_parts(out_ptr, out_len) };
        Ok((dims, raw.to_vec()))
    }

    fn input_tensor(&mut self) -> Result<*mut TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!t.is_null(), "no input tensor");
        Ok(t)
    }

    fn output_tensor(&mut self, index: i32) -> Result<*const TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index) };
        anyhow::ensure!(!t.is_null(), "no output tensor {}", index);
        Ok(t)
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        #[cfg(feature = "vision-coral")]
        unsafe {
            if let Some(d) = self.delegate {
                edgetpu_free_delegate(d);
            }
        }
    }
}
