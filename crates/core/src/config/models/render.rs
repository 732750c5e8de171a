use serde::{Deserialize, Serialize};

/// 渲染作业配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 结果URL前缀，如 `https://farm.example.com:8000`
    pub public_url: String,
    pub api_major_version: u32,
    pub default_camera: String,
    pub default_width: u32,
    pub default_height: u32,
    /// Worker本地输出目录，渲染命令中引用
    pub output_dir: String,
    pub connect_timeout_seconds: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            public_url: "https://localhost:8000".to_string(),
            api_major_version: 1,
            default_camera: "Camera001".to_string(),
            default_width: 640,
            default_height: 480,
            output_dir: "C:\\Temp".to_string(),
            connect_timeout_seconds: 10,
        }
    }
}

impl RenderConfig {
    /// `{public_url}/v{major}/renderoutput/{filename}`
    pub fn output_url(&self, filename: &str) -> String {
        format!(
            "{}/v{}/renderoutput/{}",
            self.public_url.trim_end_matches('/'),
            self.api_major_version,
            filename
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            return Err(anyhow::anyhow!("公开URL必须以http://或https://开头"));
        }

        if self.default_camera.is_empty() {
            return Err(anyhow::anyhow!("默认相机名称不能为空"));
        }

        if self.default_width == 0 || self.default_height == 0 {
            return Err(anyhow::anyhow!("默认渲染分辨率必须大于0"));
        }

        if self.connect_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_url() {
        let config = RenderConfig {
            public_url: "https://farm.local:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.output_url("abc.png"),
            "https://farm.local:8000/v1/renderoutput/abc.png"
        );
    }
}
