use windows::{
        core::*,
        Win32::Foundation::*,
        Win32::System::LibraryLoader::*,
        Win32::UI::WindowsAndMessaging::*,
        Win32::UI::Input::KeyboardAndMouse::*,
};

use core::mem::size_of;

use crate::camera::Key;
use crate::error::{ApiResult, Error, Result};

#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Quit,
    KeyPress(Key),
}

pub struct Window {
    pub handle: HWND,
    width: u32,
    height: u32,
}

fn translate_key(virtual_key: usize) -> Option<Key> {
    match virtual_key as u16 {
        k if k == VK_LEFT.0 => Some(Key::Left),
        k if k == VK_RIGHT.0 => Some(Key::Right),
        k if k == VK_UP.0 => Some(Key::Up),
        k if k == VK_DOWN.0 => Some(Key::Down),
        // Letter keys report their uppercase character code.
        k => char::from_u32(k as u32)
            .filter(|c| c.is_ascii_alphanumeric())
            .map(Key::Char),
    }
}

/// Maps a dequeued message to an event. Messages the renderer ignores,
/// Escape included, map to `None`.
fn translate_message(message: u32, wparam: usize) -> Option<Event> {
    match message {
        WM_QUIT => Some(Event::Quit),
        WM_KEYDOWN => translate_key(wparam).map(Event::KeyPress),
        _ => None
    }
}

impl Window {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Drains the message queue up to the next event the renderer cares
    /// about. `None` means the queue is empty.
    pub fn poll_events(&mut self) -> Option<Event> {
        let mut message = MSG::default();

        while unsafe { PeekMessageA(&mut message, None, 0, 0, PM_REMOVE) }.into() {
            unsafe {
                TranslateMessage(&message);
                DispatchMessageA(&message);
            }

            if let Some(event) = translate_message(message.message, message.wParam.0) {
                return Some(event);
            }
        }

        None
    }
}

extern "system" fn wndproc(window: HWND, message: u32, wparam: WPARAM, lparam:
                           LPARAM) -> LRESULT {
    match message {
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            LRESULT::default()
        }

        WM_KEYDOWN => {
            if wparam.0 == VK_ESCAPE.0 as usize {
               unsafe { DestroyWindow(window); }
            }
            LRESULT::default()
        }

        _ => {
            unsafe { DefWindowProcA(window, message, wparam, lparam) }
        }
    }
}

pub fn create_window(title: &str, width: u32, height: u32) -> Result<Window> {
    let instance = unsafe { GetModuleHandleA(None).api("GetModuleHandleA")? };

    let wc = WNDCLASSEXA {
        cbSize: size_of::<WNDCLASSEXA>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc),
        hInstance: instance,
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW).api("LoadCursorW")? },
        lpszClassName: PCSTR(b"window_class\0".as_ptr()),
        ..Default::default()
    };

    if unsafe { RegisterClassExA(&wc) } == 0 {
        return Err(Error::Api {
            call: "RegisterClassExA",
            message: "window class registration failed".into(),
        });
    }

    let too_large = |_: core::num::TryFromIntError| Error::InvalidArgument(
        format!("window size {width}x{height} is too large"));
    let mut window_rect = RECT {
        left: 0, top: 0,
        right: width.try_into().map_err(too_large)?,
        bottom: height.try_into().map_err(too_large)?,
    };

    unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false) };

    let handle = unsafe {
        CreateWindowExA(
            Default::default(),
            "window_class",
            title,
            WS_OVERLAPPEDWINDOW,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            window_rect.right - window_rect.left,
            window_rect.bottom - window_rect.top,
            None, // no parent window
            None, // no menus
            instance,
            core::ptr::null()
        )
    };

    if handle.0 == 0 {
        return Err(Error::Api {
            call: "CreateWindowExA",
            message: "window creation failed".into(),
        });
    }

    unsafe { ShowWindow(handle, SW_SHOW) };

    Ok(Window{
        handle,
        width,
        height,
    })
}
