//! Values that flow between ports and fill parameter tables

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::port::PortType;
use crate::gpu::BufferHandle;

/// Core data types that flow between nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float(f32),
    Int(i32),
    Bool(bool),
    Float2(Vec2),
    Float3(Vec3),
    Float4(Vec4),
    /// Device buffer produced by an image node
    Buffer(BufferHandle),
}

impl Value {
    /// Scalar view of the value, if it has one
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f32),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<BufferHandle> {
        match self {
            Value::Buffer(buffer) => Some(*buffer),
            _ => None,
        }
    }

    /// The single port type this value carries
    pub fn port_type(&self) -> PortType {
        match self {
            Value::Float(_) => PortType::FLOAT,
            Value::Int(_) => PortType::INT,
            Value::Bool(_) => PortType::BOOL,
            Value::Float2(_) => PortType::FLOAT2,
            Value::Float3(_) => PortType::FLOAT3,
            Value::Float4(_) => PortType::FLOAT4,
            Value::Buffer(buffer) if buffer.format.channels() == 1 => PortType::GRAY,
            Value::Buffer(_) => PortType::COLOR,
        }
    }

    /// GLSL literal for scalar and vector values
    pub fn glsl_literal(&self) -> Option<String> {
        match self {
            Value::Float(v) => Some(glsl_float(*v)),
            Value::Int(v) => Some(glsl_float(*v as f32)),
            Value::Bool(v) => Some(glsl_float(if *v { 1.0 } else { 0.0 })),
            Value::Float2(v) => Some(format!("vec2({}, {})", glsl_float(v.x), glsl_float(v.y))),
            Value::Float3(v) => Some(format!(
                "vec3({}, {}, {})",
                glsl_float(v.x),
                glsl_float(v.y),
                glsl_float(v.z)
            )),
            Value::Float4(v) => Some(format!(
                "vec4({}, {}, {}, {})",
                glsl_float(v.x),
                glsl_float(v.y),
                glsl_float(v.z),
                glsl_float(v.w)
            )),
            Value::Buffer(_) => None,
        }
    }
}

/// Float literal that always carries a decimal point or exponent
fn glsl_float(v: f32) -> String {
    format!("{:?}", v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_f32() {
        assert_eq!(Value::Float(2.5).as_f32(), Some(2.5));
        assert_eq!(Value::Int(7).as_f32(), Some(7.0));
        assert_eq!(Value::Bool(true).as_f32(), Some(1.0));
        assert_eq!(Value::Float3(Vec3::ONE).as_f32(), None);
    }

    #[test]
    fn test_glsl_literal() {
        assert_eq!(Value::Float(1.0).glsl_literal().as_deref(), Some("1.0"));
        assert_eq!(
            Value::Float3(Vec3::new(1.0, 0.5, 2.0)).glsl_literal().as_deref(),
            Some("vec3(1.0, 0.5, 2.0)")
        );
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&Value::Float2(Vec2::new(1.0, 2.0))).unwrap();
        assert_eq!(json, r#"{"Float2":[1.0,2.0]}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Float2(Vec2::new(1.0, 2.0)));
    }
}
