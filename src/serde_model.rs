//! Model export/import.
//!
//! This module defines a versioned, portable JSON artifact for [`Cnn`], consumed by
//! external inference engines.
//!
//! Layout: metadata keys first, then one top-level key per parameter in forward
//! order (`conv1.weight`, `conv1.bias`, ..., `fc2.bias`). Each parameter is a nested
//! array mirroring the tensor shape, e.g. `conv1.weight` is `[32][1][2]`.
//!
//! Floats are written with the shortest representation that round-trips and parsed
//! with correct rounding, so an imported model reproduces the exported model's
//! outputs bit for bit.
//!
//! The internal `Cnn` / layer structs are never serialized directly; every import is
//! validated (version, activation, presence, shape and finiteness of each parameter).

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::layer::{Conv1d, Dense};
use crate::model::{CnnConfig, DropoutRates, OutputMode, ParamId};
use crate::{Activation, ActivationKind, Cnn, Error, PolynomialCoefficients, Precision, Result, Tensor};

pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Deepest nesting accepted for a parameter array.
pub const MAX_PARAMETER_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub format_version: u32,
    pub input_len: usize,
    pub precision: Precision,
    pub output: OutputMode,
    pub activation: SerializedActivation,
    /// Parameter name -> nested array, in forward order.
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

/// Activation tag plus, for polynomial variants, its coefficients and scale.
///
/// `kind` is kept as a free string so that unknown tags surface as
/// [`Error::UnsupportedActivation`] rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedActivation {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl From<&Activation> for SerializedActivation {
    fn from(value: &Activation) -> Self {
        let poly = value.coefficients();
        Self {
            kind: value.kind().name().to_owned(),
            coefficients: poly.map(|p| p.coefficients().to_vec()),
            scale: poly.map(PolynomialCoefficients::scale),
        }
    }
}

impl TryFrom<&SerializedActivation> for Activation {
    type Error = Error;

    fn try_from(value: &SerializedActivation) -> Result<Self> {
        let kind: ActivationKind = value
            .kind
            .parse()
            .map_err(|_| Error::UnsupportedActivation(value.kind.clone()))?;

        if !kind.is_approximated() {
            if value.coefficients.is_some() || value.scale.is_some() {
                return Err(Error::SchemaMismatch(format!(
                    "activation {kind} does not take coefficients"
                )));
            }
            return Ok(Activation::from_kind(kind));
        }

        let (Some(coefficients), Some(scale)) = (&value.coefficients, value.scale) else {
            return Err(Error::SchemaMismatch(format!(
                "activation {kind} requires `coefficients` and `scale`"
            )));
        };
        let poly = PolynomialCoefficients::new(coefficients.clone(), scale)
            .map_err(|e| Error::SchemaMismatch(format!("activation {kind}: {e}")))?;
        Activation::approximated(kind, poly)
    }
}

impl Artifact {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::SchemaMismatch(format!(
                "unsupported model format_version {}; expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        for key in self.parameters.keys() {
            if key.parse::<ParamId>().is_err() {
                return Err(Error::SchemaMismatch(format!("unexpected key {key:?}")));
            }
        }
        for id in ParamId::ALL {
            if !self.parameters.contains_key(id.name()) {
                return Err(Error::SchemaMismatch(format!(
                    "missing parameter {:?}",
                    id.name()
                )));
            }
        }
        Ok(())
    }

    /// Parameter `id` as a tensor.
    pub fn tensor(&self, id: ParamId) -> Result<Tensor> {
        let value = self
            .parameters
            .get(id.name())
            .ok_or_else(|| Error::SchemaMismatch(format!("missing parameter {:?}", id.name())))?;
        tensor_from_value(id.name(), value)
    }
}

/// Export. Fails with `InvalidData` if any parameter is non-finite, since JSON has
/// no representation for NaN or infinity.
impl TryFrom<&Cnn> for Artifact {
    type Error = Error;

    fn try_from(model: &Cnn) -> Result<Self> {
        let mut parameters = Map::new();
        for (name, tensor) in model.named_parameters() {
            if !tensor.all_finite() {
                return Err(Error::InvalidData(format!(
                    "cannot export {name}: non-finite values"
                )));
            }
            parameters.insert(name.to_owned(), tensor_to_value(tensor));
        }
        Ok(Self {
            format_version: MODEL_FORMAT_VERSION,
            input_len: model.input_len(),
            precision: model.precision(),
            output: model.output_mode(),
            activation: SerializedActivation::from(model.activation()),
            parameters,
        })
    }
}

impl TryFrom<Artifact> for Cnn {
    type Error = Error;

    fn try_from(value: Artifact) -> Result<Self> {
        value.validate()?;
        let activation = Activation::try_from(&value.activation)?;

        let mut tensors = Vec::with_capacity(ParamId::ALL.len());
        for id in ParamId::ALL {
            tensors.push(value.tensor(id)?);
        }
        let mut it = tensors.into_iter();
        let mut next = || {
            it.next()
                .ok_or_else(|| Error::SchemaMismatch("parameter list exhausted".to_owned()))
        };

        let conv1 = Conv1d::from_parts(next()?, next()?).map_err(schema_error("conv1"))?;
        let conv2 = Conv1d::from_parts(next()?, next()?).map_err(schema_error("conv2"))?;
        let fc1 = Dense::from_parts(next()?, next()?).map_err(schema_error("fc1"))?;
        let fc2 = Dense::from_parts(next()?, next()?).map_err(schema_error("fc2"))?;

        let config = CnnConfig {
            input_len: value.input_len,
            activation,
            precision: value.precision,
            output: value.output,
            dropout: DropoutRates::default(),
        };
        Cnn::from_layers(config, conv1, conv2, fc1, fc2).map_err(schema_error("model"))
    }
}

fn schema_error(context: &'static str) -> impl Fn(Error) -> Error {
    move |e| match e {
        Error::ShapeMismatch(msg) | Error::InvalidData(msg) => {
            Error::SchemaMismatch(format!("{context}: {msg}"))
        }
        other => other,
    }
}

fn tensor_to_value(tensor: &Tensor) -> Value {
    fn nest(shape: &[usize], data: &[f64]) -> Value {
        match shape.split_first() {
            None => Value::from(data[0]),
            Some((&n, rest)) => {
                let stride = data.len() / n;
                Value::Array(
                    data.chunks(stride)
                        .map(|chunk| {
                            if rest.is_empty() {
                                Value::from(chunk[0])
                            } else {
                                nest(rest, chunk)
                            }
                        })
                        .collect(),
                )
            }
        }
    }
    nest(tensor.shape(), tensor.data())
}

fn tensor_from_value(name: &str, value: &Value) -> Result<Tensor> {
    // The shape is read along the first elements, then every branch is checked.
    let mut shape = Vec::new();
    let mut cur = value;
    while let Value::Array(items) = cur {
        if shape.len() == MAX_PARAMETER_DEPTH {
            return Err(Error::SchemaMismatch(format!(
                "{name}: nesting deeper than {MAX_PARAMETER_DEPTH}"
            )));
        }
        let Some(first) = items.first() else {
            return Err(Error::SchemaMismatch(format!("{name}: empty array")));
        };
        shape.push(items.len());
        cur = first;
    }
    if shape.is_empty() {
        return Err(Error::SchemaMismatch(format!("{name}: expected an array")));
    }

    let mut data = Vec::new();
    collect_values(name, value, &shape, &mut data)?;
    Tensor::new(shape, data).map_err(schema_error("parameter"))
}

fn collect_values(name: &str, value: &Value, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
    match shape.split_first() {
        None => {
            let v = value
                .as_f64()
                .ok_or_else(|| Error::SchemaMismatch(format!("{name}: expected a number")))?;
            if !v.is_finite() {
                return Err(Error::SchemaMismatch(format!("{name}: non-finite value")));
            }
            out.push(v);
            Ok(())
        }
        Some((&n, rest)) => match value {
            Value::Array(items) if items.len() == n => {
                for item in items {
                    collect_values(name, item, rest, out)?;
                }
                Ok(())
            }
            _ => Err(Error::SchemaMismatch(format!(
                "{name}: ragged nested array"
            ))),
        },
    }
}

fn json_error(e: serde_json::Error) -> Error {
    use serde_json::error::Category;
    match e.classify() {
        Category::Data => Error::SchemaMismatch(format!("failed to parse model json: {e}")),
        Category::Io | Category::Syntax | Category::Eof => {
            Error::InvalidData(format!("failed to parse model json: {e}"))
        }
    }
}

impl Cnn {
    /// Serialize the model to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&Artifact::try_from(self)?)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Serialize the model to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&Artifact::try_from(self)?)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Parse a model from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let artifact: Artifact = serde_json::from_str(s).map_err(json_error)?;
        artifact.try_into()
    }

    /// Save the model to a JSON file (pretty-printed).
    ///
    /// The file is written to a temporary sibling and renamed into place, so readers
    /// never observe a partial artifact.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        let dir = match p.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        tmp.write_all(s.as_bytes()).map_err(|e| Error::io(p, e))?;
        tmp.flush().map_err(|e| Error::io(p, e))?;
        tmp.persist(p).map_err(|e| Error::io(p, e.error))?;
        log::info!(
            "saved model ({} parameters, activation {}) to {}",
            self.num_parameters(),
            self.activation().kind(),
            p.display()
        );
        Ok(())
    }

    /// Load a model from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        let model = Self::from_json_str(&s)?;
        log::info!(
            "loaded model (input length {}, activation {}) from {}",
            model.input_len(),
            model.activation().kind(),
            p.display()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CnnBuilder;

    /// Model with input length 3 and parameters `((i % 9) - 4) / 8` per tensor.
    fn golden_model() -> Cnn {
        let fill = |shape: &[usize]| {
            let n: usize = shape.iter().product();
            let data = (0..n).map(|i| ((i % 9) as f64 - 4.0) * 0.125).collect();
            Tensor::new(shape.to_vec(), data).unwrap()
        };
        let conv1 = Conv1d::from_parts(fill(&[32, 1, 2]), fill(&[32])).unwrap();
        let conv2 = Conv1d::from_parts(fill(&[64, 32, 2]), fill(&[64])).unwrap();
        let fc1 = Dense::from_parts(fill(&[64, 64]), fill(&[64])).unwrap();
        let fc2 = Dense::from_parts(fill(&[1, 64]), fill(&[1])).unwrap();
        let config = CnnConfig {
            input_len: 3,
            activation: Activation::from_kind(ActivationKind::ApproxReLU),
            precision: Precision::Double,
            output: OutputMode::Logits,
            dropout: DropoutRates::default(),
        };
        Cnn::from_layers(config, conv1, conv2, fc1, fc2).unwrap()
    }

    fn small_model() -> Cnn {
        CnnBuilder::new(4)
            .unwrap()
            .activation(ActivationKind::ApproxSwish)
            .build_with_seed(5)
            .unwrap()
    }

    #[test]
    fn golden_json_is_stable_and_roundtrips() {
        let json = golden_model().to_json_string().unwrap();

        let golden = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/golden/cnn_v1.json"
        ))
        .trim_end();
        assert_eq!(json, golden);

        let loaded = Cnn::from_json_str(golden).unwrap();
        assert_eq!(loaded.to_json_string().unwrap(), golden);
    }

    #[test]
    fn keys_are_top_level_and_in_forward_order() {
        let value: Value = serde_json::from_str(&small_model().to_json_string().unwrap()).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "format_version",
                "input_len",
                "precision",
                "output",
                "activation",
                "conv1.weight",
                "conv1.bias",
                "conv2.weight",
                "conv2.bias",
                "fc1.weight",
                "fc1.bias",
                "fc2.weight",
                "fc2.bias"
            ]
        );
        assert_eq!(value["activation"]["kind"], "ApproxSwish");
        assert_eq!(value["activation"]["scale"], 1.0);
    }

    #[test]
    fn nested_arrays_mirror_tensor_shape() {
        let base = small_model();
        // First filter [1.0, -1.0] with bias 0.5.
        let mut w = base.conv1().weight().clone();
        w.data_mut()[..2].copy_from_slice(&[1.0, -1.0]);
        let mut b = base.conv1().bias().clone();
        b.data_mut()[0] = 0.5;
        let model = Cnn::from_layers(
            base.config().clone(),
            Conv1d::from_parts(w, b).unwrap(),
            base.conv2().clone(),
            base.fc1().clone(),
            base.fc2().clone(),
        )
        .unwrap();

        let artifact = Artifact::try_from(&model).unwrap();
        assert_eq!(artifact.parameters["conv1.weight"][0], serde_json::json!([[1.0, -1.0]]));
        assert_eq!(artifact.parameters["conv1.bias"][0], serde_json::json!(0.5));
        assert_eq!(artifact.parameters["conv1.weight"].as_array().unwrap().len(), 32);
        assert_eq!(artifact.parameters["fc2.weight"].as_array().unwrap().len(), 1);
        assert_eq!(artifact.parameters["fc2.weight"][0].as_array().unwrap().len(), 64);
    }

    #[test]
    fn non_finite_parameters_are_not_exported() {
        for bad in [f64::NAN, f64::INFINITY] {
            let mut model = small_model();
            model
                .apply_update("fc2.bias", &Tensor::from_vec(vec![bad]).unwrap())
                .unwrap();
            for err in [
                Artifact::try_from(&model).unwrap_err(),
                model.to_json_string().unwrap_err(),
                model.to_json_string_pretty().unwrap_err(),
            ] {
                assert!(matches!(&err, Error::InvalidData(msg) if msg.contains("fc2.bias")));
            }

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("model.json");
            assert!(model.save_json(&path).is_err());
            assert!(!path.exists());
        }
    }

    #[test]
    fn exact_activation_carries_only_kind() {
        let model = CnnBuilder::new(4)
            .unwrap()
            .activation(ActivationKind::ReLU)
            .build_with_seed(0)
            .unwrap();
        let value: Value = serde_json::from_str(&model.to_json_string().unwrap()).unwrap();
        assert_eq!(value["activation"], serde_json::json!({"kind": "ReLU"}));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut value: Value = serde_json::from_str(&small_model().to_json_string().unwrap()).unwrap();
        value["format_version"] = Value::from(999);
        let err = Cnn::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert!(format!("{err}").contains("format_version"));
    }

    #[test]
    fn rejects_unknown_activation() {
        let mut value: Value = serde_json::from_str(&small_model().to_json_string().unwrap()).unwrap();
        value["activation"] = serde_json::json!({"kind": "GELU"});
        assert!(matches!(
            Cnn::from_json_str(&value.to_string()),
            Err(Error::UnsupportedActivation(_))
        ));
    }

    #[test]
    fn rejects_missing_or_malformed_parameters() {
        let base: Value = serde_json::from_str(&small_model().to_json_string().unwrap()).unwrap();

        let mut missing = base.clone();
        missing.as_object_mut().unwrap().remove("fc1.bias");
        assert!(matches!(
            Cnn::from_json_str(&missing.to_string()),
            Err(Error::SchemaMismatch(_))
        ));

        let mut wrong_shape = base.clone();
        wrong_shape["fc2.bias"] = serde_json::json!([0.0, 1.0]);
        assert!(matches!(
            Cnn::from_json_str(&wrong_shape.to_string()),
            Err(Error::SchemaMismatch(_))
        ));

        let mut ragged = base.clone();
        ragged["fc2.weight"] = serde_json::json!([[0.0], [1.0, 2.0]]);
        assert!(matches!(
            Cnn::from_json_str(&ragged.to_string()),
            Err(Error::SchemaMismatch(_))
        ));

        let mut too_deep = base.clone();
        too_deep["fc2.bias"] = serde_json::json!([[[[[0.0]]]]]);
        assert!(matches!(
            Cnn::from_json_str(&too_deep.to_string()),
            Err(Error::SchemaMismatch(_))
        ));

        let mut extra = base.clone();
        extra["fc3.weight"] = serde_json::json!([0.0]);
        assert!(matches!(
            Cnn::from_json_str(&extra.to_string()),
            Err(Error::SchemaMismatch(_))
        ));

        let mut not_number = base;
        not_number["fc2.bias"] = serde_json::json!(["x"]);
        assert!(matches!(
            Cnn::from_json_str(&not_number.to_string()),
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[test]
    fn approximated_activation_requires_coefficients() {
        let mut value: Value = serde_json::from_str(&small_model().to_json_string().unwrap()).unwrap();
        value["activation"] = serde_json::json!({"kind": "ApproxReLU"});
        assert!(matches!(
            Cnn::from_json_str(&value.to_string()),
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[test]
    fn malformed_json_is_invalid_data() {
        assert!(matches!(
            Cnn::from_json_str("{\"format_version\": 1,"),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = small_model();
        model.save_json(&path).unwrap();

        let loaded = Cnn::load_json(&path).unwrap();
        for ((n1, t1), (n2, t2)) in model.named_parameters().into_iter().zip(loaded.named_parameters()) {
            assert_eq!(n1, n2);
            assert_eq!(t1, t2);
        }
        assert_eq!(loaded.activation(), model.activation());

        assert!(matches!(
            Cnn::load_json(dir.path().join("missing.json")),
            Err(Error::Io { .. })
        ));
    }
}
