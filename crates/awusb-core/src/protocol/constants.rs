//! Fixed values of the AW USB download link.

/// Allwinner vendor ID.
pub const AW_VENDOR_ID: u16 = 0x1F3A;
/// Product ID of the download-mode (efex) interface.
pub const AW_PRODUCT_ID: u16 = 0xEFE8;

/// Default size of the output buffer; the largest chunk a write sends at once.
pub const OUT_BUFFER_SIZE: usize = 0x10000;
/// Default size of the input buffer; the largest chunk a read requests at once.
pub const IN_BUFFER_SIZE: usize = 0x500;

/// Deadline for a single bulk transfer, in milliseconds.
pub const TRANSFER_TIMEOUT_MS: u64 = 6_000_000;
/// Wait between retries after a stall/NAK, in milliseconds.
pub const NAK_BACKOFF_MS: u64 = 1000;

/// Consecutive stalls tolerated on one write chunk.
pub const WRITE_MAX_STALLS: u32 = 5;
/// Consecutive stalls tolerated by one read.
pub const READ_MAX_STALLS: u32 = 10;

/// Status code the download-mode firmware reports on a bulk-in NAK.
pub const QUIRK_STALL_STATUS: u32 = 15;

// ioctl encoding (asm-generic layout)
pub const IOC_NRBITS: u32 = 8;
pub const IOC_TYPEBITS: u32 = 8;
pub const IOC_SIZEBITS: u32 = 14;

pub const IOC_NRSHIFT: u32 = 0;
pub const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
pub const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
pub const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const IOC_NONE: u32 = 0;
pub const IOC_WRITE: u32 = 1;
pub const IOC_READ: u32 = 2;

/// Magic byte shared by all AW USB control codes.
pub const AWUSB_IOC_MAGIC: u8 = b's';

/// Size of the parameter block exchanged by SET/GET.
pub const PARAM_BLOCK_SIZE: usize = 16;
/// Size of the command header (`value`, `length`, buffer pointer) on a 64-bit host.
pub const COMMAND_HEADER_SIZE: usize = 16;

pub const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
}

pub const AWUSB_IOCRESET: u32 = ioc(IOC_NONE, AWUSB_IOC_MAGIC, 0, 0);
pub const AWUSB_IOCSET: u32 = ioc(IOC_WRITE, AWUSB_IOC_MAGIC, 1, PARAM_BLOCK_SIZE);
pub const AWUSB_IOCGET: u32 = ioc(IOC_READ, AWUSB_IOC_MAGIC, 2, PARAM_BLOCK_SIZE);
pub const AWUSB_IOCSEND: u32 = ioc(IOC_WRITE, AWUSB_IOC_MAGIC, 3, COMMAND_HEADER_SIZE);
pub const AWUSB_IOCRECV: u32 = ioc(IOC_READ, AWUSB_IOC_MAGIC, 4, COMMAND_HEADER_SIZE);
pub const AWUSB_IOCSEND_RECV: u32 = ioc(
    IOC_READ | IOC_WRITE,
    AWUSB_IOC_MAGIC,
    5,
    COMMAND_HEADER_SIZE,
);
