use nalgebra as na;

use crate::replay::error::BoxError;

/// Pose of a camera, sent to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyTransformMessage {
    pub id: usize,
    pub transform: na::Isometry3<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointMessage {
    pub id: usize,
    pub position: na::Point3<f64>,
}

/// Frame dispatched to the engine at the given replay timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub id: usize,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VizMessage {
    Pose(BodyTransformMessage),
    Point(PointMessage),
    Frame(FrameMessage),
}

impl VizMessage {
    /// One line of the viewer's text protocol.
    pub fn encode(&self) -> String {
        match self {
            VizMessage::Pose(msg) => {
                let q = msg.transform.rotation;
                let t = msg.transform.translation;
                format!(
                    "pose {} {} {} {} {} {} {} {}\n",
                    msg.id, q.i, q.j, q.k, q.w, t.x, t.y, t.z
                )
            }
            VizMessage::Point(msg) => format!(
                "point {} {} {} {}\n",
                msg.id, msg.position.x, msg.position.y, msg.position.z
            ),
            VizMessage::Frame(msg) => format!("frame {} {}\n", msg.id, msg.timestamp),
        }
    }

    pub fn parse(line: &str) -> Result<Self, BoxError> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("pose") => Ok(VizMessage::Pose(parse_transform_message(parts)?)),
            Some("point") => Ok(VizMessage::Point(parse_point_message(parts)?)),
            Some("frame") => {
                let id = next_field::<usize>(&mut parts, "id")?;
                let timestamp = next_field::<f64>(&mut parts, "timestamp")?;
                Ok(VizMessage::Frame(FrameMessage { id, timestamp }))
            }
            Some(tag) => Err(format!("unknown message tag '{}'", tag).into()),
            None => Err("empty message".into()),
        }
    }
}

fn next_field<'a, T>(parts: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<T, BoxError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let field = parts.next().ok_or_else(|| format!("missing field '{}'", name))?;
    Ok(field.parse::<T>()?)
}

fn parse_transform_message<'a>(
    mut parts: impl Iterator<Item = &'a str>,
) -> Result<BodyTransformMessage, BoxError> {
    let id = next_field::<usize>(&mut parts, "id")?;
    let qx = next_field::<f64>(&mut parts, "qx")?;
    let qy = next_field::<f64>(&mut parts, "qy")?;
    let qz = next_field::<f64>(&mut parts, "qz")?;
    let qw = next_field::<f64>(&mut parts, "qw")?;

    let x = next_field::<f64>(&mut parts, "x")?;
    let y = next_field::<f64>(&mut parts, "y")?;
    let z = next_field::<f64>(&mut parts, "z")?;
    let rotation = na::UnitQuaternion::from_quaternion(na::Quaternion::new(qw, qx, qy, qz));
    let transform = na::Isometry3::from_parts(na::Translation3::new(x, y, z), rotation);
    Ok(BodyTransformMessage { id, transform })
}

fn parse_point_message<'a>(
    mut parts: impl Iterator<Item = &'a str>,
) -> Result<PointMessage, BoxError> {
    let id = next_field::<usize>(&mut parts, "id")?;
    let x = next_field::<f64>(&mut parts, "x")?;
    let y = next_field::<f64>(&mut parts, "y")?;
    let z = next_field::<f64>(&mut parts, "z")?;
    let position = na::Point3::new(x, y, z);
    Ok(PointMessage { id, position })
}
