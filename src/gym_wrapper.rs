use pyo3::{
    prelude::*,
    types::{PyBytes, PyDict},
};
use tracing::debug;

use crate::environment::{Emulator, RawFrame, RawStep};
use crate::error::{DqnError, Result};

/// An Atari game driven through gymnasium and ale-py in an embedded Python
/// interpreter.
pub struct GymnasiumWrapper {
    env: PyObject,
    gymnasium: Py<PyModule>,
    env_id: String,
    render_mode: Option<String>,
    num_actions: usize,
    lives: u32,
}

impl GymnasiumWrapper {
    /// `render_mode` is passed straight to `gymnasium.make`, e.g. `"human"` or
    /// `"rgb_array"`. `None` disables rendering.
    pub fn new(env_id: &str, render_mode: Option<&str>) -> Result<Self> {
        Python::with_gil(|py| -> Result<Self> {
            let gymnasium = py.import_bound("gymnasium")?;

            // Newer ale-py releases only register the Atari ids on request.
            if let Ok(ale_py) = py.import_bound("ale_py") {
                if gymnasium.hasattr("register_envs")? {
                    gymnasium.call_method1("register_envs", (ale_py,))?;
                }
            }

            let env = make_env(py, &gymnasium, env_id, render_mode)?;
            let num_actions = env
                .getattr("action_space")?
                .getattr("n")?
                .extract::<usize>()?;
            debug!(env_id, num_actions, "created gymnasium environment");

            Ok(Self {
                env: env.unbind(),
                gymnasium: gymnasium.unbind(),
                env_id: env_id.to_string(),
                render_mode: render_mode.map(str::to_string),
                num_actions,
                lives: 0,
            })
        })
    }

    /// Rebuild the underlying environment with a different render mode.
    pub fn set_render_mode(&mut self, render_mode: Option<&str>) -> Result<()> {
        Python::with_gil(|py| -> Result<()> {
            let gymnasium = self.gymnasium.bind(py);
            self.env.bind(py).call_method0("close")?;
            let new_env = make_env(py, gymnasium, &self.env_id, render_mode)?;
            self.env = new_env.unbind();
            self.render_mode = render_mode.map(str::to_string);
            Ok(())
        })
    }
}

fn make_env<'py>(
    py: Python<'py>,
    gymnasium: &Bound<'py, PyModule>,
    env_id: &str,
    render_mode: Option<&str>,
) -> PyResult<Bound<'py, PyAny>> {
    let kwargs = PyDict::new_bound(py);
    if let Some(mode) = render_mode {
        kwargs.set_item("render_mode", mode)?;
    }
    gymnasium.call_method("make", (env_id,), Some(&kwargs))
}

/// Copy a `(height, width, 3)` uint8 numpy array into a `RawFrame`.
fn frame_from_array(array: &Bound<'_, PyAny>) -> Result<RawFrame> {
    let (height, width, channels) = array
        .getattr("shape")?
        .extract::<(usize, usize, usize)>()?;
    if channels != 3 {
        return Err(DqnError::Environment(format!(
            "expected an RGB observation, got {channels} channels"
        )));
    }

    let bytes = array.call_method0("tobytes")?;
    let bytes = bytes.downcast::<PyBytes>().map_err(PyErr::from)?;
    RawFrame::new(width, height, bytes.as_bytes().to_vec())
}

fn lives_from_info(info: &Bound<'_, PyAny>) -> Result<u32> {
    Ok(info.call_method1("get", ("lives", 0))?.extract::<u32>()?)
}

impl Emulator for GymnasiumWrapper {
    fn reset(&mut self, seed: Option<u64>) -> Result<RawFrame> {
        Python::with_gil(|py| -> Result<RawFrame> {
            let kwargs = PyDict::new_bound(py);
            if let Some(seed) = seed {
                kwargs.set_item("seed", seed)?;
            }
            let result_tuple = self.env.bind(py).call_method("reset", (), Some(&kwargs))?;

            let frame = frame_from_array(&result_tuple.get_item(0)?)?;
            self.lives = lives_from_info(&result_tuple.get_item(1)?)?;
            Ok(frame)
        })
    }

    fn step(&mut self, action: usize) -> Result<RawStep> {
        if action >= self.num_actions {
            return Err(DqnError::InvalidAction {
                action,
                num_actions: self.num_actions,
            });
        }

        Python::with_gil(|py| -> Result<RawStep> {
            let result_tuple = self.env.bind(py).call_method1("step", (action,))?;

            let frame = frame_from_array(&result_tuple.get_item(0)?)?;
            let reward: f64 = result_tuple.get_item(1)?.extract()?;
            let terminated: bool = result_tuple.get_item(2)?.extract()?;
            let truncated: bool = result_tuple.get_item(3)?.extract()?;
            self.lives = lives_from_info(&result_tuple.get_item(4)?)?;

            Ok(RawStep {
                frame,
                reward,
                terminated,
                truncated,
                lives: self.lives,
            })
        })
    }

    fn num_actions(&self) -> usize {
        self.num_actions
    }

    fn action_meanings(&self) -> Result<Vec<String>> {
        Python::with_gil(|py| -> Result<Vec<String>> {
            let meanings = self
                .env
                .bind(py)
                .getattr("unwrapped")?
                .call_method0("get_action_meanings")?
                .extract::<Vec<String>>()?;
            Ok(meanings)
        })
    }

    fn lives(&self) -> u32 {
        self.lives
    }

    fn render(&mut self) -> Result<()> {
        if self.render_mode.is_none() {
            return Ok(());
        }
        Python::with_gil(|py| -> Result<()> {
            self.env.bind(py).call_method0("render")?;
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        Python::with_gil(|py| -> Result<()> {
            self.env.bind(py).call_method0("close")?;
            Ok(())
        })
    }
}
