use renderfarm_core::models::{RenderParams, Workspace};

/// 远程脚本命令构造
pub struct RemoteCommands;

impl RemoteCommands {
    /// 设置远端的会话标识全局变量
    pub fn set_session(session_guid: &str) -> String {
        format!("SessionGuid = \"{session_guid}\"")
    }

    /// 将贴图与外部引用路径指向工作空间目录
    pub fn set_workspace(workspace: &Workspace) -> String {
        let root = Self::workspace_root(workspace);
        format!(
            concat!(
                "for i=1 to pathConfig.mapPaths.count() do ( pathConfig.mapPaths.delete 1 )\r\n",
                "for i=1 to pathConfig.xrefPaths.count() do ( pathConfig.xrefPaths.delete 1 )\r\n",
                "pathConfig.mapPaths.add \"{root}\\\\maps\"\r\n",
                "pathConfig.xrefPaths.add \"{root}\\\\xrefs\"",
            ),
            root = root,
        )
    }

    fn workspace_root(workspace: &Workspace) -> String {
        format!(
            "{}\\\\api-keys\\\\{}\\\\workspaces\\\\{}",
            workspace.home_dir, workspace.api_key, workspace.guid
        )
    }

    /// 打开工作空间中的场景文件，加载失败时远端输出 `FAIL`
    pub fn open_scene(scene_root: &str, scene_filename: &str, workspace: &Workspace) -> String {
        format!(
            concat!(
                "resetMaxFile #noPrompt \r\n",
                " sceneFilename = \"{root}\\\\scenes\\\\{scene}\" \r\n",
                " if existFile sceneFilename then ( \r\n",
                "     sceneLoaded = loadMaxFile sceneFilename useFileUnits:true quiet:true \r\n",
                "     if sceneLoaded then ( \r\n",
                "         threejsSceneRoot = Dummy name:\"{scene_root}\" \r\n",
                "     ) else ( \r\n",
                "         print \"FAIL | failed to load scene\" \r\n",
                "     ) \r\n",
                " ) else ( \r\n",
                "     print \"FAIL | scene file not found\" \r\n",
                " ) \r\n",
            ),
            root = Self::workspace_root(workspace),
            scene = scene_filename,
            scene_root = scene_root,
        )
    }

    /// 用指定相机渲染到PNG文件
    pub fn render_scene(params: &RenderParams, output_path: &str) -> String {
        format!(
            concat!(
                " pngio.settype(#true24) ; ",
                " pngio.setAlpha false ; ",
                " viewport.setLayout #layout_1 ; ",
                " viewport.setCamera ${camera} ; ",
                " renderWidth  = {width} ; ",
                " renderHeight = {height} ; ",
                " rendUseActiveView = true ; ",
                " rendSaveFile = true ; ",
                " rendOutputFilename = \"{output}\" ; ",
                " max quick render ",
            ),
            camera = params.camera_name,
            width = params.width,
            height = params.height,
            output = output_path.replace('\\', "\\\\"),
        )
    }
}
