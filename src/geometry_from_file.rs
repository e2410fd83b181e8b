//! Supports reading mechanism geometry from YAML file (optional)

use std::path::Path;
use yaml_rust2::{Yaml, YamlLoader};

use crate::geometry::falcon_geometry::{StamperGeometry, TrilaterationGeometry};
use crate::parameter_error::ParameterError;
use crate::utils::parse_angle;

fn load_document(contents: &str) -> Result<Yaml, ParameterError> {
    let mut docs = YamlLoader::load_from_str(contents)
        .map_err(|e| ParameterError::ParseError(format!("{}", e)))?;
    if docs.is_empty() {
        return Err(ParameterError::ParseError("empty document".to_string()));
    }
    Ok(docs.swap_remove(0))
}

/// Reads a finite number. Integers are accepted, strings in `deg(..)` notation are
/// accepted when `angle` is set.
fn number(node: &Yaml, field: &str, angle: bool) -> Result<f64, ParameterError> {
    let value = match node {
        Yaml::Real(_) => node.as_f64(),
        Yaml::Integer(i) => Some(*i as f64),
        Yaml::String(text) if angle => parse_angle(text),
        Yaml::BadValue | Yaml::Null => {
            return Err(ParameterError::MissingField(field.to_string()));
        }
        _ => None,
    }
    .ok_or_else(|| ParameterError::ParseError(format!("{} is not a number", field)))?;

    if !value.is_finite() {
        return Err(ParameterError::InvalidValue { field: field.to_string(), value });
    }
    Ok(value)
}

fn positive(node: &Yaml, field: &str) -> Result<f64, ParameterError> {
    let value = number(node, field, false)?;
    if value <= 0.0 {
        return Err(ParameterError::InvalidValue { field: field.to_string(), value });
    }
    Ok(value)
}

impl StamperGeometry {
    /// Read the Stamper geometry from YAML file. YAML file like this is supported:
    /// ```yaml
    /// stamper_geometry:
    ///   a: 0.06
    ///   b: 0.1025
    ///   c: 0.01443
    ///   d: 0.01125
    ///   e: 0.01125
    ///   f: -0.025
    ///   r: 0.04
    ///   s: -0.02309
    /// leg_azimuths: [deg(105.0), deg(-15.0), deg(-135.0)]
    /// encoder:
    ///   wheel_slots: 320
    ///   shaft_diameter: 0.01425
    ///   small_arm_diameter: 0.11
    ///   theta_offset: deg(35.0)
    /// origin_z: 0.15
    /// ```
    /// The `leg_azimuths`, `encoder` and `origin_z` sections are optional and default to the
    /// Novint Falcon values. This is the format written by [`StamperGeometry::to_yaml`].
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ParameterError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ParameterError> {
        let doc = load_document(contents)?;
        let defaults = StamperGeometry::novint_falcon();

        let links = &doc["stamper_geometry"];
        if links.is_badvalue() {
            return Err(ParameterError::MissingField("stamper_geometry".to_string()));
        }

        let leg_azimuths = match &doc["leg_azimuths"] {
            Yaml::BadValue => defaults.leg_azimuths,
            Yaml::Array(items) => {
                if items.len() != 3 {
                    return Err(ParameterError::ParseError(format!(
                        "leg_azimuths must have 3 entries, found {}",
                        items.len()
                    )));
                }
                let mut azimuths = [0.0; 3];
                for (i, item) in items.iter().enumerate() {
                    azimuths[i] = number(item, &format!("leg_azimuths[{}]", i), true)?;
                }
                azimuths
            }
            _ => {
                return Err(ParameterError::ParseError(
                    "leg_azimuths must be a list".to_string(),
                ));
            }
        };

        let encoder = &doc["encoder"];
        let (wheel_slots, shaft_diameter, small_arm_diameter, theta_offset) =
            if encoder.is_badvalue() {
                (
                    defaults.wheel_slots,
                    defaults.shaft_diameter,
                    defaults.small_arm_diameter,
                    defaults.theta_offset,
                )
            } else {
                (
                    positive(&encoder["wheel_slots"], "encoder.wheel_slots")?,
                    positive(&encoder["shaft_diameter"], "encoder.shaft_diameter")?,
                    positive(&encoder["small_arm_diameter"], "encoder.small_arm_diameter")?,
                    number(&encoder["theta_offset"], "encoder.theta_offset", true)?,
                )
            };

        let origin_z = if doc["origin_z"].is_badvalue() {
            defaults.origin_z
        } else {
            positive(&doc["origin_z"], "origin_z")?
        };

        Ok(StamperGeometry {
            a: positive(&links["a"], "a")?,
            b: positive(&links["b"], "b")?,
            c: number(&links["c"], "c", false)?,
            d: number(&links["d"], "d", false)?,
            e: number(&links["e"], "e", false)?,
            f: number(&links["f"], "f", false)?,
            r: number(&links["r"], "r", false)?,
            s: number(&links["s"], "s", false)?,
            leg_azimuths,
            wheel_slots,
            shaft_diameter,
            small_arm_diameter,
            theta_offset,
            origin_z,
        })
    }
}

impl TrilaterationGeometry {
    /// Read the trilateration geometry from YAML, in the format written by
    /// [`TrilaterationGeometry::to_yaml`]. The `encoder` section is optional.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ParameterError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ParameterError> {
        let doc = load_document(contents)?;
        let defaults = TrilaterationGeometry::novint_falcon();

        let links = &doc["trilateration_geometry"];
        if links.is_badvalue() {
            return Err(ParameterError::MissingField("trilateration_geometry".to_string()));
        }

        let encoder = &doc["encoder"];
        let (encoder_zero, encoder_span) = if encoder.is_badvalue() {
            (defaults.encoder_zero, defaults.encoder_span)
        } else {
            (
                number(&encoder["zero"], "encoder.zero", false)?,
                positive(&encoder["span"], "encoder.span")?,
            )
        };

        Ok(TrilaterationGeometry {
            f: positive(&links["f"], "f")?,
            e: positive(&links["e"], "e")?,
            re: positive(&links["re"], "re")?,
            rf: positive(&links["rf"], "rf")?,
            encoder_zero,
            encoder_span,
        })
    }
}
