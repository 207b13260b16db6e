//! Console text in English and Chinese.
//!
//! Only human-facing output is translated; log events stay in English.

use std::env;

use clap::ValueEnum;

/// Display language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Lang {
    En,
    Zh,
}

impl Lang {
    /// Pick a language from `LC_ALL`, `LC_MESSAGES` or `LANG`.
    pub fn detect() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|name| env::var(name).ok())
            .find(|value| !value.is_empty())
            .map(|value| Self::from_locale(&value))
            .unwrap_or(Lang::En)
    }

    /// Map a locale string such as `zh_CN.UTF-8` to a language.
    pub fn from_locale(locale: &str) -> Self {
        let lower = locale.to_ascii_lowercase();
        if lower.starts_with("zh") || lower.starts_with("chinese") {
            Lang::Zh
        } else {
            Lang::En
        }
    }

    pub fn text(self) -> Text {
        Text { lang: self }
    }
}

/// Translated strings for one language.
#[derive(Debug, Clone, Copy)]
pub struct Text {
    lang: Lang,
}

macro_rules! pick {
    ($self:ident, $en:expr, $zh:expr) => {
        match $self.lang {
            Lang::En => $en,
            Lang::Zh => $zh,
        }
    };
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

impl Text {
    pub fn error(self) -> &'static str {
        pick!(self, "Error", "错误")
    }

    // download

    pub fn download_title(self) -> &'static str {
        pick!(self, "SiteMirror download", "SiteMirror 镜像下载")
    }

    pub fn manifest_count(self, n: usize) -> String {
        pick!(self, format!("  Manifest:   {}", n), format!("  文件列表: {} 个", n))
    }

    pub fn existing_count(self, n: usize) -> String {
        pick!(self, format!("  Existing:   {}", n), format!("  已存在:   {} 个", n))
    }

    pub fn pending_count(self, n: usize) -> String {
        pick!(self, format!("  Pending:    {}", n), format!("  待下载:   {} 个", n))
    }

    pub fn rejected_count(self, n: usize) -> String {
        pick!(self, format!("  Rejected:   {}", n), format!("  已拒绝:   {} 个", n))
    }

    pub fn workers(self, n: usize) -> String {
        pick!(self, format!("  Workers:    {}", n), format!("  并发数:   {}", n))
    }

    pub fn retries(self, n: u32) -> String {
        pick!(self, format!("  Retries:    {}", n), format!("  重试次数: {}", n))
    }

    pub fn nothing_to_do(self) -> &'static str {
        pick!(
            self,
            "Every file is already present; nothing to download.",
            "所有文件均已存在，无需下载。"
        )
    }

    pub fn progress_line(self, ok: usize, not_found: usize, failed: usize, kib_per_sec: f64) -> String {
        pick!(
            self,
            format!(
                "OK {}  404 {}  failed {}  {:.0} KB/s",
                ok, not_found, failed, kib_per_sec
            ),
            format!(
                "成功 {}  404 {}  失败 {}  {:.0} KB/s",
                ok, not_found, failed, kib_per_sec
            )
        )
    }

    pub fn done(self, secs: f64) -> String {
        pick!(
            self,
            format!("  Finished in {:.0}s", secs),
            format!("  下载完成，耗时 {:.0} 秒", secs)
        )
    }

    pub fn interrupted(self, reason: &str) -> String {
        pick!(
            self,
            format!("  Stopped early: {}", reason),
            format!("  提前停止: {}", reason)
        )
    }

    pub fn downloaded(self, n: usize, bytes: u64) -> String {
        pick!(
            self,
            format!("  New:        {} ({:.1} MB)", n, mb(bytes)),
            format!("  新增:     {} ({:.1} MB)", n, mb(bytes))
        )
    }

    pub fn not_found(self, n: usize) -> String {
        pick!(self, format!("  404:        {}", n), format!("  404:      {}", n))
    }

    pub fn failed(self, n: usize) -> String {
        pick!(self, format!("  Failed:     {}", n), format!("  失败:     {}", n))
    }

    pub fn failures_saved(self, path: &str) -> String {
        pick!(
            self,
            format!("  Failure list written to {}", path),
            format!("  失败列表已写入 {}", path)
        )
    }

    pub fn journal_failed(self, error: &str) -> String {
        pick!(
            self,
            format!("  Journal not saved: {}", error),
            format!("  下载记录未保存: {}", error)
        )
    }

    pub fn need_base_url(self) -> &'static str {
        pick!(
            self,
            "No origin URL. Use --base-url or set base_url in the [mirror] section of config.ini.",
            "未指定源站地址。请使用 --base-url 或在 config.ini 的 [mirror] 中设置 base_url。"
        )
    }

    pub fn interrupt_requested(self) -> &'static str {
        pick!(
            self,
            "Interrupt received, finishing in-flight files...",
            "收到中断信号，正在完成进行中的文件……"
        )
    }

    // serve

    pub fn serve_title(self) -> &'static str {
        pick!(self, "SiteMirror server", "SiteMirror 本地服务器")
    }

    pub fn missing_root(self, path: &str) -> String {
        pick!(
            self,
            format!("Mirror root {} does not exist. Run the download command first.", path),
            format!("镜像目录 {} 不存在，请先运行 download 命令。", path)
        )
    }

    pub fn engine(self, name: &str) -> String {
        pick!(self, format!("  Engine:     {}", name), format!("  引擎:     {}", name))
    }

    pub fn protocol(self, protocol: &str) -> String {
        pick!(self, format!("  Protocol:   {}", protocol), format!("  协议:     {}", protocol))
    }

    pub fn address(self, url: &str) -> String {
        pick!(self, format!("  Address:    {}", url), format!("  地址:     {}", url))
    }

    pub fn tls_threaded_hint(self) -> &'static str {
        pick!(
            self,
            "  Note:       TLS and HTTP/2 need --engine async",
            "  提示:     TLS 与 HTTP/2 需要 --engine async"
        )
    }

    pub fn press_ctrl_c(self) -> &'static str {
        pick!(self, "  Press Ctrl+C to stop", "  按 Ctrl+C 停止")
    }

    pub fn server_stopped(self) -> &'static str {
        pick!(self, "Server stopped.", "服务器已停止。")
    }

    // status

    pub fn status_title(self) -> &'static str {
        pick!(self, "SiteMirror status", "SiteMirror 镜像状态")
    }

    pub fn status_downloaded(self, n: usize, bytes: u64) -> String {
        pick!(
            self,
            format!("  Downloaded: {} ({:.1} MB)", n, mb(bytes)),
            format!("  已下载:   {} ({:.1} MB)", n, mb(bytes))
        )
    }

    pub fn status_missing(self, n: usize) -> String {
        pick!(self, format!("  Missing:    {}", n), format!("  缺失:     {}", n))
    }

    pub fn status_progress(self, pct: f64) -> String {
        pick!(self, format!("  Progress:   {:.1}%", pct), format!("  完成度:   {:.1}%", pct))
    }

    pub fn missing_by_category(self) -> &'static str {
        pick!(self, "  Missing by category:", "  缺失分类:")
    }

    pub fn last_session(self, finished_at: &str, completed: usize, failed: usize) -> String {
        pick!(
            self,
            format!(
                "  Last run:   {} ({} downloaded, {} failed)",
                finished_at, completed, failed
            ),
            format!(
                "  上次运行: {} (下载 {}，失败 {})",
                finished_at, completed, failed
            )
        )
    }
}
