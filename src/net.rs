//! # Description
//! - the layer graph consumed by the planner and the accelerator assembly
//! - a network description is a json list of layers in topological order, each with bottom and top blobs
//! - shapes are inferred once while loading, the graph is read only afterwards
//!
//! the description format follows the caffe prototxt field names:
//! ```json
//! {
//!   "name": "tiny",
//!   "layers": [
//!     {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 3, 8, 8]},
//!     {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
//!      "num_output": 8, "kernel_size": 3, "pad": 1},
//!     {"name": "relu1", "type": "ReLU", "bottom": ["conv1"], "top": ["conv1"]}
//!   ]
//! }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
};

use enum_as_inner::EnumAsInner;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::AccError;

/// the raw layer list as written in the description file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetParameter {
    pub name: String,
    pub layers: Vec<LayerParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerParameter {
    pub name: String,
    #[serde(default)]
    pub bottom: Vec<String>,
    #[serde(default)]
    pub top: Vec<String>,
    #[serde(flatten)]
    pub param: LayerTypeParameter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerTypeParameter {
    Input {
        shape: Vec<usize>,
    },
    Convolution(ConvolutionParameter),
    Pooling(PoolingParameter),
    InnerProduct {
        num_output: usize,
    },
    Split,
    Concat,
    /// every other type (ReLU, Dropout, BatchNorm ...) needs no hardware
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowParameter {
    pub kernel_size: Option<usize>,
    pub kernel_h: Option<usize>,
    pub kernel_w: Option<usize>,
    pub stride: Option<usize>,
    pub stride_h: Option<usize>,
    pub stride_w: Option<usize>,
    pub pad: Option<usize>,
    pub pad_h: Option<usize>,
    pub pad_w: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvolutionParameter {
    pub num_output: usize,
    #[serde(flatten)]
    pub window: WindowParameter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolingParameter {
    #[serde(default = "default_pool")]
    pub pool: String,
    #[serde(default)]
    pub global_pooling: bool,
    #[serde(flatten)]
    pub window: WindowParameter,
}

fn default_pool() -> String {
    "MAX".to_string()
}

/// a feature map flowing between layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlobShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl BlobShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        BlobShape {
            channels,
            height,
            width,
        }
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

/// # Description
/// the sliding window walked over a padded input feature map
/// * `h`, `w`: the unpadded input size
/// * `kh`, `kw`: kernel size
/// * `stride_h`, `stride_w`, `pad_h`, `pad_w`: stride and zero padding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowGeometry {
    pub h: usize,
    pub w: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
}

impl WindowGeometry {
    /// a stride one window without padding
    pub fn dense(h: usize, w: usize, kh: usize, kw: usize) -> Self {
        WindowGeometry {
            h,
            w,
            kh,
            kw,
            stride_h: 1,
            stride_w: 1,
            pad_h: 0,
            pad_w: 0,
        }
    }

    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }

    pub fn with_pad(mut self, pad_h: usize, pad_w: usize) -> Self {
        self.pad_h = pad_h;
        self.pad_w = pad_w;
        self
    }

    pub fn padded_height(&self) -> usize {
        self.h + 2 * self.pad_h
    }

    pub fn padded_width(&self) -> usize {
        self.w + 2 * self.pad_w
    }

    pub fn padded_pixels(&self) -> usize {
        self.padded_height() * self.padded_width()
    }

    pub fn output_height(&self) -> usize {
        (self.padded_height() - self.kh) / self.stride_h + 1
    }

    pub fn output_width(&self) -> usize {
        (self.padded_width() - self.kw) / self.stride_w + 1
    }

    pub fn output_pixels(&self) -> usize {
        self.output_height() * self.output_width()
    }

    /// check that at least one window fits into the padded map
    pub fn validate(&self, layer: &str) -> Result<(), AccError> {
        if self.kh == 0 || self.kw == 0 {
            return Err(AccError::invalid_layer(layer, "kernel size must be positive"));
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(AccError::invalid_layer(layer, "stride must be positive"));
        }
        if self.h == 0 || self.w == 0 {
            return Err(AccError::invalid_layer(layer, "empty input feature map"));
        }
        if self.kh > self.padded_height() || self.kw > self.padded_width() {
            return Err(AccError::invalid_layer(
                layer,
                format!(
                    "kernel {}x{} does not fit the padded map {}x{}",
                    self.kh,
                    self.kw,
                    self.padded_height(),
                    self.padded_width()
                ),
            ));
        }
        Ok(())
    }

    fn from_parameter(
        layer: &str,
        param: &WindowParameter,
        bottom: &BlobShape,
    ) -> Result<Self, AccError> {
        let kh = param
            .kernel_h
            .or(param.kernel_size)
            .ok_or_else(|| AccError::invalid_layer(layer, "missing kernel size"))?;
        let kw = param
            .kernel_w
            .or(param.kernel_size)
            .ok_or_else(|| AccError::invalid_layer(layer, "missing kernel size"))?;
        let geometry = WindowGeometry {
            h: bottom.height,
            w: bottom.width,
            kh,
            kw,
            stride_h: param.stride_h.or(param.stride).unwrap_or(1),
            stride_w: param.stride_w.or(param.stride).unwrap_or(1),
            pad_h: param.pad_h.or(param.pad).unwrap_or(0),
            pad_w: param.pad_w.or(param.pad).unwrap_or(0),
        };
        geometry.validate(layer)?;
        Ok(geometry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMethod {
    Max,
    Avg,
}

impl PoolMethod {
    pub fn parse(layer: &str, method: &str) -> Result<Self, AccError> {
        match method.to_ascii_uppercase().as_str() {
            "MAX" => Ok(PoolMethod::Max),
            "AVE" | "AVG" => Ok(PoolMethod::Avg),
            _ => Err(AccError::UnsupportedPoolMethod {
                layer: layer.to_string(),
                method: method.to_string(),
            }),
        }
    }
}

/// convolution and fully connected layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConvParams {
    pub nin: usize,
    pub nout: usize,
    pub geometry: WindowGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolParams {
    pub nin: usize,
    pub method: PoolMethod,
    pub geometry: WindowGeometry,
}

/// the closed set of layer types, fully connected layers are stored as a convolution covering
/// the whole input map
#[derive(Debug, Clone, PartialEq, EnumAsInner, Serialize)]
pub enum LayerKind {
    Input,
    Convolution(ConvParams),
    Pooling(PoolParams),
    InnerProduct(ConvParams),
    Split,
    Concat,
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub bottoms: Vec<String>,
    pub tops: Vec<String>,
    pub bottom_shapes: Vec<BlobShape>,
    pub top_shapes: Vec<BlobShape>,
}

impl Layer {
    /// the convolution class parameters shared by conv and fc layers
    pub fn conv_params(&self) -> Option<&ConvParams> {
        match &self.kind {
            LayerKind::Convolution(p) | LayerKind::InnerProduct(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_compute(&self) -> bool {
        matches!(
            self.kind,
            LayerKind::Convolution(_) | LayerKind::InnerProduct(_) | LayerKind::Pooling(_)
        )
    }
}

/// # Description
/// the read only layer graph, layers are topologically ordered
#[derive(Debug, Clone, Serialize)]
pub struct Net {
    pub name: String,
    layers: Vec<Layer>,
}

impl Net {
    /// build a net from already shaped layers without any check
    pub fn from_layers(name: &str, layers: Vec<Layer>) -> Self {
        Net {
            name: name.to_string(),
            layers,
        }
    }

    /// read a json network description
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AccError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let param: NetParameter = serde_json::from_reader(reader)?;
        info!("loaded network {} from {:?}", param.name, path.as_ref());
        Net::from_parameter(param)
    }

    /// # Description
    /// insert the implicit splits and infer every blob shape
    pub fn from_parameter(param: NetParameter) -> Result<Self, AccError> {
        let layers = insert_splits(param.layers);
        let mut blobs: HashMap<String, BlobShape> = HashMap::new();
        let mut shaped = Vec::with_capacity(layers.len());
        for layer in layers {
            let bottom_shapes = layer
                .bottom
                .iter()
                .map(|b| {
                    blobs
                        .get(b)
                        .copied()
                        .ok_or_else(|| AccError::UndefinedConnection {
                            layer: layer.name.clone(),
                            connection: b.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let (kind, top_shapes) = shape_layer(&layer, &bottom_shapes)?;
            debug!(
                "layer {}: {:?} -> {:?}",
                layer.name, bottom_shapes, top_shapes
            );
            for (top, shape) in layer.top.iter().zip(top_shapes.iter()) {
                blobs.insert(top.clone(), *shape);
            }
            shaped.push(Layer {
                name: layer.name,
                kind,
                bottoms: layer.bottom,
                tops: layer.top,
                bottom_shapes,
                top_shapes,
            });
        }
        Ok(Net {
            name: param.name,
            layers: shaped,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_layer(&self) -> Option<&Layer> {
        self.layers.iter().find(|l| matches!(l.kind, LayerKind::Input))
    }

    pub fn input_shape(&self) -> Option<BlobShape> {
        self.input_layer().and_then(|l| l.top_shapes.first().copied())
    }
}

/// infer the kind and the top shapes of one layer
///
/// conv and pool outputs use floor division, unlike caffe which rounds pooled maps up: the
/// controller only fires on windows that lie completely inside the padded map
fn shape_layer(
    layer: &LayerParameter,
    bottoms: &[BlobShape],
) -> Result<(LayerKind, Vec<BlobShape>), AccError> {
    let name = layer.name.as_str();
    let single_bottom = || -> Result<BlobShape, AccError> {
        match bottoms {
            [b] => Ok(*b),
            _ => Err(AccError::invalid_layer(
                name,
                format!("expects one bottom, found {}", bottoms.len()),
            )),
        }
    };
    let result = match &layer.param {
        LayerTypeParameter::Input { shape } => {
            let shape = match shape.as_slice() {
                [_, c, h, w] => BlobShape::new(*c, *h, *w),
                [_, c] => BlobShape::new(*c, 1, 1),
                _ => {
                    return Err(AccError::invalid_layer(
                        name,
                        "input shape must be (n, c, h, w) or (n, c)",
                    ))
                }
            };
            if shape.channels == 0 || shape.pixels() == 0 {
                return Err(AccError::invalid_layer(name, "empty input shape"));
            }
            (LayerKind::Input, vec![shape; layer.top.len().max(1)])
        }
        LayerTypeParameter::Convolution(conv) => {
            let bottom = single_bottom()?;
            if conv.num_output == 0 {
                return Err(AccError::invalid_layer(name, "num_output must be positive"));
            }
            let geometry = WindowGeometry::from_parameter(name, &conv.window, &bottom)?;
            let params = ConvParams {
                nin: bottom.channels,
                nout: conv.num_output,
                geometry,
            };
            let top = BlobShape::new(
                conv.num_output,
                geometry.output_height(),
                geometry.output_width(),
            );
            (LayerKind::Convolution(params), vec![top])
        }
        LayerTypeParameter::Pooling(pool) => {
            let bottom = single_bottom()?;
            let method = PoolMethod::parse(name, &pool.pool)?;
            let geometry = if pool.global_pooling {
                WindowGeometry::dense(bottom.height, bottom.width, bottom.height, bottom.width)
            } else {
                WindowGeometry::from_parameter(name, &pool.window, &bottom)?
            };
            let params = PoolParams {
                nin: bottom.channels,
                method,
                geometry,
            };
            let top = BlobShape::new(
                bottom.channels,
                geometry.output_height(),
                geometry.output_width(),
            );
            (LayerKind::Pooling(params), vec![top])
        }
        LayerTypeParameter::InnerProduct { num_output } => {
            let bottom = single_bottom()?;
            if *num_output == 0 {
                return Err(AccError::invalid_layer(name, "num_output must be positive"));
            }
            // one window covering the whole input map
            let geometry =
                WindowGeometry::dense(bottom.height, bottom.width, bottom.height, bottom.width);
            let params = ConvParams {
                nin: bottom.channels,
                nout: *num_output,
                geometry,
            };
            (
                LayerKind::InnerProduct(params),
                vec![BlobShape::new(*num_output, 1, 1)],
            )
        }
        LayerTypeParameter::Split => {
            let bottom = single_bottom()?;
            if layer.top.len() < 2 {
                return Err(AccError::invalid_layer(name, "split needs at least two tops"));
            }
            (LayerKind::Split, vec![bottom; layer.top.len()])
        }
        LayerTypeParameter::Concat => {
            let first = bottoms
                .first()
                .ok_or_else(|| AccError::invalid_layer(name, "concat without bottoms"))?;
            if bottoms
                .iter()
                .any(|b| b.height != first.height || b.width != first.width)
            {
                return Err(AccError::invalid_layer(
                    name,
                    "concat inputs differ in spatial size",
                ));
            }
            let channels = bottoms.iter().map(|b| b.channels).sum();
            (
                LayerKind::Concat,
                vec![BlobShape::new(channels, first.height, first.width)],
            )
        }
        LayerTypeParameter::Other => {
            let bottom = single_bottom()?;
            (LayerKind::Bypass, vec![bottom; layer.top.len()])
        }
    };
    if result.1.len() != layer.top.len() {
        return Err(AccError::invalid_layer(
            name,
            format!("expects {} tops, found {}", result.1.len(), layer.top.len()),
        ));
    }
    Ok(result)
}

/// # Description
/// a blob read by more than one layer gets an explicit split layer right after its producer,
/// each reader is renamed to its own split output
///
/// in place layers (top equal to bottom) start a new version of the blob, only the readers of
/// the same version share a split
fn insert_splits(layers: Vec<LayerParameter>) -> Vec<LayerParameter> {
    struct Version {
        blob: String,
        producer: usize,
        readers: Vec<(usize, usize)>,
    }
    let mut versions: Vec<Version> = Vec::new();
    let mut current: HashMap<&str, usize> = HashMap::new();
    for (li, layer) in layers.iter().enumerate() {
        for (bi, bottom) in layer.bottom.iter().enumerate() {
            if let Some(&v) = current.get(bottom.as_str()) {
                versions[v].readers.push((li, bi));
            }
        }
        if matches!(layer.param, LayerTypeParameter::Split) {
            // explicit splits are kept as written
            for top in layer.top.iter() {
                current.remove(top.as_str());
            }
            continue;
        }
        for top in layer.top.iter() {
            current.insert(top.as_str(), versions.len());
            versions.push(Version {
                blob: top.clone(),
                producer: li,
                readers: Vec::new(),
            });
        }
    }

    let mut renames: HashMap<(usize, usize), String> = HashMap::new();
    let mut splits: BTreeMap<usize, Vec<LayerParameter>> = BTreeMap::new();
    for version in versions.iter().filter(|v| v.readers.len() > 1) {
        let split_name = format!("{}_split", version.blob);
        let tops = (0..version.readers.len())
            .map(|k| format!("{}_{}", split_name, k))
            .collect::<Vec<_>>();
        for (reader, top) in version.readers.iter().zip(tops.iter()) {
            renames.insert(*reader, top.clone());
        }
        debug!("inserting {} for {} readers", split_name, tops.len());
        splits
            .entry(version.producer)
            .or_default()
            .push(LayerParameter {
                name: split_name,
                bottom: vec![version.blob.clone()],
                top: tops,
                param: LayerTypeParameter::Split,
            });
    }

    let mut result = Vec::with_capacity(layers.len() + splits.len());
    for (li, mut layer) in layers.into_iter().enumerate() {
        for (bi, bottom) in layer.bottom.iter_mut().enumerate() {
            if let Some(new_name) = renames.remove(&(li, bi)) {
                *bottom = new_name;
            }
        }
        result.push(layer);
        if let Some(mut inserted) = splits.remove(&li) {
            result.append(&mut inserted);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Net, AccError> {
        let param: NetParameter = serde_json::from_str(json)?;
        Net::from_parameter(param)
    }

    #[test]
    fn test_shapes() -> Result<(), Box<dyn std::error::Error>> {
        let net = parse(
            r#"{"name": "tiny", "layers": [
                {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 3, 8, 8]},
                {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
                 "num_output": 8, "kernel_size": 3, "pad": 1},
                {"name": "relu1", "type": "ReLU", "bottom": ["conv1"], "top": ["conv1"]},
                {"name": "pool1", "type": "Pooling", "bottom": ["conv1"], "top": ["pool1"],
                 "pool": "MAX", "kernel_size": 2, "stride": 2},
                {"name": "fc1", "type": "InnerProduct", "bottom": ["pool1"], "top": ["fc1"],
                 "num_output": 10}
            ]}"#,
        )?;
        let layers = net.layers();
        assert_eq!(layers.len(), 5);
        assert_eq!(layers[1].top_shapes[0], BlobShape::new(8, 8, 8));
        assert!(matches!(layers[2].kind, LayerKind::Bypass));
        assert_eq!(layers[3].top_shapes[0], BlobShape::new(8, 4, 4));
        let fc = layers[4].kind.as_inner_product().ok_or("fc")?;
        assert_eq!((fc.nin, fc.nout), (8, 10));
        assert_eq!((fc.geometry.kh, fc.geometry.kw), (4, 4));
        assert_eq!(fc.geometry.output_pixels(), 1);
        assert_eq!(net.input_shape(), Some(BlobShape::new(3, 8, 8)));
        Ok(())
    }

    #[test]
    fn test_insert_splits() -> Result<(), Box<dyn std::error::Error>> {
        let net = parse(
            r#"{"name": "branchy", "layers": [
                {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 4, 6, 6]},
                {"name": "a", "type": "Convolution", "bottom": ["data"], "top": ["a"],
                 "num_output": 2, "kernel_size": 1},
                {"name": "b", "type": "Convolution", "bottom": ["data"], "top": ["b"],
                 "num_output": 3, "kernel_size": 3, "pad": 1},
                {"name": "cat", "type": "Concat", "bottom": ["a", "b"], "top": ["cat"]}
            ]}"#,
        )?;
        let names = net.layers().iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["data", "data_split", "a", "b", "cat"]);
        let split = &net.layers()[1];
        assert!(matches!(split.kind, LayerKind::Split));
        assert_eq!(split.tops, vec!["data_split_0", "data_split_1"]);
        assert_eq!(net.layers()[2].bottoms, vec!["data_split_0"]);
        assert_eq!(net.layers()[3].bottoms, vec!["data_split_1"]);
        assert_eq!(net.layers()[4].top_shapes[0], BlobShape::new(5, 6, 6));
        Ok(())
    }

    #[test]
    fn test_pool_shape_rounds_down() -> Result<(), Box<dyn std::error::Error>> {
        let net = parse(
            r#"{"name": "odd", "layers": [
                {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 2, 8, 8]},
                {"name": "pool", "type": "Pooling", "bottom": ["data"], "top": ["pool"],
                 "pool": "MAX", "kernel_size": 3, "stride": 2}
            ]}"#,
        )?;
        // (8 - 3) / 2 + 1, caffe would round up to 4
        assert_eq!(net.layers()[1].top_shapes[0], BlobShape::new(2, 3, 3));
        Ok(())
    }

    #[test]
    fn test_unsupported_pool_method() {
        let result = parse(
            r#"{"name": "bad", "layers": [
                {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 4, 6, 6]},
                {"name": "pool", "type": "Pooling", "bottom": ["data"], "top": ["pool"],
                 "pool": "STOCHASTIC", "kernel_size": 2}
            ]}"#,
        );
        assert!(matches!(
            result,
            Err(AccError::UnsupportedPoolMethod { layer, .. }) if layer == "pool"
        ));
    }

    #[test]
    fn test_undefined_bottom() {
        let result = parse(
            r#"{"name": "bad", "layers": [
                {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 4, 6, 6]},
                {"name": "conv", "type": "Convolution", "bottom": ["nothing"], "top": ["conv"],
                 "num_output": 2, "kernel_size": 1}
            ]}"#,
        );
        assert!(matches!(
            result,
            Err(AccError::UndefinedConnection { connection, .. }) if connection == "nothing"
        ));
    }

    #[test]
    fn test_kernel_too_large() {
        let result = parse(
            r#"{"name": "bad", "layers": [
                {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 4, 2, 2]},
                {"name": "conv", "type": "Convolution", "bottom": ["data"], "top": ["conv"],
                 "num_output": 2, "kernel_size": 3}
            ]}"#,
        );
        assert!(matches!(result, Err(AccError::InvalidLayer { .. })));
    }
}
