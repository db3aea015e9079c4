fn main() {
    // The Slint window is only compiled for the desktop front-end
    #[cfg(feature = "gui")]
    slint_build::compile("ui/main_window.slint").expect("Failed to compile Slint UI");
}
